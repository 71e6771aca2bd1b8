//! Error Taxonomy
//!
//! All runtime errors raised by the evaluator. Directive evaluators wrap
//! adapter errors with source location and directive context before
//! propagating; `CommandNonZeroExit` is recoverable when a `/run` opts into
//! continue-on-error, everything else is fatal for the enclosing directive.

use crate::ast::Span;
use thiserror::Error;

/// Where an error was raised, for the host's pretty-printer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    pub span: Option<Span>,
    pub directive: Option<String>,
    pub identifier: Option<String>,
    pub file: Option<String>,
    pub working_dir: Option<String>,
}

impl ErrorContext {
    pub fn at(span: Span) -> Self {
        Self { span: Some(span), ..Default::default() }
    }
}

#[derive(Error, Debug, Clone)]
pub enum MlldError {
    // ---- Parse ----
    #[error("parse error at line {line}: {message}")]
    Parse { message: String, line: usize },

    // ---- Names ----
    #[error("cannot assign to reserved variable '{name}'")]
    ReservedName { name: String, ctx: ErrorContext },

    #[error("variable '{name}' is already defined in this scope")]
    Redefinition { name: String, ctx: ErrorContext },

    #[error("import of '{name}' conflicts with an existing binding from {existing_source}")]
    ImportConflict { name: String, existing_source: String, ctx: ErrorContext },

    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String, ctx: ErrorContext },

    #[error("unknown command or executable '{name}'")]
    UnknownCommand { name: String, ctx: ErrorContext },

    // ---- Cycles ----
    #[error("circular import detected: {chain}")]
    CircularImport { chain: String, ctx: ErrorContext },

    #[error("circular executable reference: '{name}'")]
    CircularExecutable { name: String, ctx: ErrorContext },

    // ---- Resolution ----
    #[error("path not found: '{path}'")]
    PathNotFound { path: String, ctx: ErrorContext },

    #[error("URL blocked by policy: {url} ({reason})")]
    UrlPolicyViolation { url: String, reason: String, ctx: ErrorContext },

    #[error("fetch timed out after {seconds}s: {url}")]
    FetchTimeout { url: String, seconds: u64, ctx: ErrorContext },

    #[error("section '{section}' not found in '{path}'")]
    SectionNotFound { section: String, path: String, ctx: ErrorContext },

    // ---- Execution ----
    #[error("forbidden shell operator '{operator}' in command")]
    ForbiddenShellOperator { operator: String, command: String, ctx: ErrorContext },

    #[error("command blocked by policy: {command}")]
    CommandDenied { command: String, ctx: ErrorContext },

    #[error("command exited with status {exit_code}: {command}")]
    CommandNonZeroExit {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
        ctx: ErrorContext,
    },

    #[error("command timed out after {seconds}s: {command}")]
    CommandTimeout { command: String, seconds: u64, ctx: ErrorContext },

    #[error("{language} code raised: {message}")]
    CodeException { language: String, message: String, ctx: ErrorContext },

    // ---- Guards ----
    #[error("guard denied: {reason}")]
    GuardDenied { reason: String, guard: String, ctx: ErrorContext },

    #[error("guard '{guard}' exhausted its retry budget of {budget}")]
    GuardRetryExhausted { guard: String, budget: u32, ctx: ErrorContext },

    // ---- Pipelines ----
    #[error("pipeline stage {stage} failed: {cause}")]
    PipelineStageFailed { stage: usize, cause: Box<MlldError>, ctx: ErrorContext },

    #[error("pipeline retry budget of {budget} exhausted at stage {stage}")]
    PipelineRetryExhausted { stage: usize, budget: u32, ctx: ErrorContext },

    // ---- Values ----
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String, ctx: ErrorContext },

    #[error("invalid tool specification: {message}")]
    InvalidToolSpec { message: String, ctx: ErrorContext },

    #[error("invalid structured value: {message}")]
    InvalidStructuredValue { message: String, ctx: ErrorContext },

    #[error("missing value for '{name}'")]
    MissingValue { name: String, ctx: ErrorContext },

    // ---- I/O plumbing ----
    #[error("io error during {operation}: {message}")]
    Io { operation: String, message: String, ctx: ErrorContext },
}

impl MlldError {
    /// Attach or enrich directive context while propagating upward.
    pub fn with_context(mut self, f: impl FnOnce(&mut ErrorContext)) -> Self {
        if let Some(ctx) = self.context_mut() {
            f(ctx);
        }
        self
    }

    /// Recoverable errors may be buffered when the directive opts in.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MlldError::CommandNonZeroExit { .. })
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            MlldError::Parse { .. } => None,
            MlldError::ReservedName { ctx, .. }
            | MlldError::Redefinition { ctx, .. }
            | MlldError::ImportConflict { ctx, .. }
            | MlldError::UnknownVariable { ctx, .. }
            | MlldError::UnknownCommand { ctx, .. }
            | MlldError::CircularImport { ctx, .. }
            | MlldError::CircularExecutable { ctx, .. }
            | MlldError::PathNotFound { ctx, .. }
            | MlldError::UrlPolicyViolation { ctx, .. }
            | MlldError::FetchTimeout { ctx, .. }
            | MlldError::SectionNotFound { ctx, .. }
            | MlldError::ForbiddenShellOperator { ctx, .. }
            | MlldError::CommandDenied { ctx, .. }
            | MlldError::CommandNonZeroExit { ctx, .. }
            | MlldError::CommandTimeout { ctx, .. }
            | MlldError::CodeException { ctx, .. }
            | MlldError::GuardDenied { ctx, .. }
            | MlldError::GuardRetryExhausted { ctx, .. }
            | MlldError::PipelineStageFailed { ctx, .. }
            | MlldError::PipelineRetryExhausted { ctx, .. }
            | MlldError::TypeMismatch { ctx, .. }
            | MlldError::InvalidToolSpec { ctx, .. }
            | MlldError::InvalidStructuredValue { ctx, .. }
            | MlldError::MissingValue { ctx, .. }
            | MlldError::Io { ctx, .. } => Some(ctx),
        }
    }
}

pub type Result<T> = std::result::Result<T, MlldError>;
