//! Evaluation Engine
//!
//! The document walk, expression evaluation and interpolation, directive
//! evaluators, executable invocation, the pipeline engine, and builtin
//! methods. Evaluation is a single-threaded cooperative async walk; the
//! mutually recursive entry points return boxed futures.

pub mod builtins;
pub mod data_value;
pub mod evaluate;
pub mod expr;
pub mod field_access;
pub mod r#for;
pub mod guard;
pub mod import;
pub mod invocation;
pub mod pipeline;
pub mod run;
pub mod var;
pub mod when;

use std::future::Future;
use std::pin::Pin;

use crate::value::StructuredValue;

pub use builtins::BuiltinMethod;
pub use evaluate::{evaluate_document, evaluate_source};
pub use expr::{eval_expr, interpolate, InterpContext};
pub use field_access::ResolvedAccessor;

/// Boxed future for the recursive evaluator entry points.
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of invoking an executable or evaluating a `when` body. Guard
/// decisions travel as values; only fatal errors use `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(StructuredValue),
    Retry(Option<String>),
    Deny(Option<String>),
}

impl Outcome {
    pub fn value(self) -> Option<StructuredValue> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }
}
