//! Integration tests for Layer 0: Foundation
//!
//! Tests for core types: Value, identifiers, Error, and persistent collections.

mod collections;
