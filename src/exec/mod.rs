//! Execution Adapters
//!
//! Subprocess-backed adapters for shell commands and embedded code, plus the
//! pre-execution command classifier.

pub mod bash_code;
pub mod classifier;
pub mod js;
pub mod process;
pub mod python;
pub mod shell;

pub use bash_code::run_shell_code;
pub use classifier::classify;
pub use js::{build_js_program, is_bare_expression, run_js, CodeOutput, CodeRequest};
pub use process::{ExecOutput, SpawnSpec};
pub use python::{build_python_program, run_python};
pub use shell::{build_heredoc_script, referenced_params, run_command, CommandRequest};
