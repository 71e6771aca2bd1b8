//! Surface Parser
//!
//! Hand-written recursive-descent parser for the `.mld` directive language.

pub mod cursor;
pub mod document;
pub mod expression;

pub use cursor::Cursor;
pub use document::parse;
pub use expression::{parse_expr, parse_with_clause};
