//! Schema model, storage units, and store backends for Strata.
//!
//! This crate provides:
//! - [`EntitySchema`] - Field, group and edge description of one entity type
//! - [`SchemaProvider`] / [`SchemaRegistry`] - Schema sources and the process-wide cache
//! - [`StorageUnit`] - One persisted record holding a field-group instance's payload
//! - [`Store`] - The persistence interface, with [`MemoryStore`] as reference backend

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod memory;
pub mod registry;
pub mod schema;
pub mod store;
pub mod unit;

pub use memory::{MemoryStore, Snapshot, StoreOp};
pub use registry::{SchemaProvider, SchemaRegistry, StaticSchemaProvider};
pub use schema::{Cardinality, DataType, EntitySchema, EntitySchemaBuilder, FieldSchema, GroupSchema};
pub use store::{CrossReference, Store};
pub use unit::{Payload, StorageUnit, UnitLink};
