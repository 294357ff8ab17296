//! Model layer integration tests
//!
//! Exercise codecs, pseudo-nodes, the unit cache, write planning and the
//! access guard through the public API, one level below the scenarios.

mod access;
mod cache;
mod codecs;
mod nodes;
