//! AST module
//!
//! Node types consumed read-only by the evaluator.

pub mod types;

pub use types::*;
