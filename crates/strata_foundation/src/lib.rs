//! Core values, identifiers, errors, and persistent collections for Strata.
//!
//! This crate provides:
//! - [`Value`] - The raw payload value stored inside storage units
//! - [`EntityId`], [`UnitId`], [`CrossRefId`], [`FieldId`], [`GroupId`] - Identifiers
//! - [`Error`] - Rich error types with context
//! - Persistent collections ([`LtVec`], [`LtMap`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod error;
pub mod ids;
pub mod value;

pub use collections::{LtMap, LtVec};
pub use error::{Access, Error, ErrorCategory, ErrorContext, ErrorKind};
pub use ids::{CrossRefId, EntityId, FieldId, GroupId, UnitId};
pub use value::{Value, ValueKind};

/// Result type used throughout Strata.
pub type Result<T> = std::result::Result<T, Error>;
