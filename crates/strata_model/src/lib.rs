//! Lazily materialized entity model for Strata.
//!
//! An [`Entity`] exposes the storage units of one entity as a tree of
//! pseudo-nodes. Nodes decode their field's payload on first access and
//! remember what was loaded, so [`Entity::save`] can reconcile the tree
//! back into the smallest set of storage-unit writes.
//!
//! This crate provides:
//! - [`CodecRegistry`] - Per-datatype decode/encode between payload and [`TypedValue`]
//! - [`PseudoNode`] - Value, list and unavailable nodes, plus [`GroupingNode`]
//! - [`ValueCache`] - Per-group lazy cache of loaded storage units
//! - [`AccessGuard`] - Memoized readable/writable groups per security context
//! - [`reconcile`] - The write-back planner
//! - [`Entity`] / [`Cursor`] - The caller-facing surface
//!
//! Entities are single-threaded: their units are shared through `Rc`, so an
//! [`Entity`] is neither `Send` nor `Sync`. Registries, the store and the
//! access guard are shared through `Arc` and may be used from many threads.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod access;
pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod entity;
pub mod grouping;
pub mod node;
pub mod reconcile;
pub mod relation;
mod resolve;
pub mod unit_ref;

pub use access::{
    AccessGuard, AllowAll, GroupPermissions, GroupSet, PermissionBackend, SecurityContext,
    StaticPermissions,
};
pub use cache::ValueCache;
pub use codec::{
    Codec, CodecRegistry, DecodeContext, Decoded, Encoded, LocalizedText, SideRelationship,
    TypedValue,
};
pub use config::{ModelConfig, WritePolicy};
pub use context::ModelContext;
pub use entity::{Cursor, Entity, EntityHandle, SaveReport};
pub use grouping::{GroupingNode, NodeFactory};
pub use node::{
    FieldInput, FieldRelationship, NodeValue, PseudoList, PseudoNode, PseudoValue, Unavailable,
};
pub use reconcile::{PendingRelationship, PlannedParent, PlannedUnit, WritePlan, reconcile};
pub use relation::{RelatedEntity, Relationship};
pub use unit_ref::UnitRef;
