//! Environment
//!
//! Scoped variable store, reserved variables, INPUT construction, and the
//! evaluator configuration.

pub mod config;
pub mod environment;
pub mod input;
pub mod reserved;

pub use config::EvalConfig;
pub use environment::{Capabilities, Effect, Environment, GuardDef, Scope};
pub use input::create_input_value;
pub use reserved::{alias_of, is_reserved, RESERVED_NAMES};
