//! End-to-end scenarios across all layers
//!
//! Each scenario drives entities through the model against a shared
//! in-memory store and checks what reached the store.

mod relationships;
