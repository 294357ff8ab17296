//! Strata - Lazily materialized entity graphs with minimal-diff write-back
//!
//! This crate re-exports all layers of the Strata system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: strata_model      - Pseudo-nodes, value cache, access guard, reconcile, save
//! Layer 1: strata_storage    - Schema, storage units, store interface, memory store
//! Layer 0: strata_foundation - Core types (Value, ids, Error)
//! ```

pub use strata_foundation as foundation;
pub use strata_model as model;
pub use strata_storage as storage;
