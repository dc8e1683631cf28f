//! # lb-binding
//!
//! Proves that declared optimizer parameters and declared experiment targets
//! form a well-formed binding before any optimization session starts, and
//! resolves parameter vectors into concrete target values afterwards.

mod graph;

pub use graph::{validate, BindingGraph};
