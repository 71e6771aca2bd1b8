//! Executable Definitions
//!
//! The tagged union behind every callable: shell command templates, embedded
//! code, value templates, aliases to other executables, markdown section
//! extractors, resolver routes, bare pipelines, data builders, and the
//! `when`/`for` block forms. All variants share parameter names, the
//! directive that defined them, and optionally a captured module environment
//! plus shadow environments for code adapters.

use indexmap::IndexMap;

use crate::ast::{
    CodeLanguage, CommandExpr, ForExprNode, PipelineFormat, StageNode, TemplateNode, ValueExpr,
    WhenExprNode, WithClause,
};

use super::security::SecurityDescriptor;
use super::variable::Variable;

/// Which directive created an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDirective {
    Exe,
    Var,
}

/// Explicit per-language maps of captured helper executables, passed through
/// the adapter boundary instead of closures.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShadowEnvs {
    pub js: IndexMap<String, ExecutableDefinition>,
    pub python: IndexMap<String, ExecutableDefinition>,
}

impl ShadowEnvs {
    pub fn is_empty(&self) -> bool {
        self.js.is_empty() && self.python.is_empty()
    }
}

/// Body variants of an executable.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutableKind {
    /// Shell command template with interpolation slots
    Command { template: CommandExpr },
    /// Embedded code with a language tag
    Code { language: CodeLanguage, source: String },
    /// Value-producing template
    Template { template: TemplateNode },
    /// Alias: calls another executable with pre-bound arguments
    CommandRef { target: String, args: Vec<ValueExpr> },
    /// Markdown section extraction
    Section {
        path: TemplateNode,
        section: TemplateNode,
        rename: Option<TemplateNode>,
    },
    /// Routed through the resolver manager
    Resolver { path: String, payload: Option<ValueExpr> },
    /// Bare pipeline as a callable
    Pipeline { stages: Vec<StageNode>, format: Option<PipelineFormat> },
    /// Structured-data builder re-evaluated per call
    Data { template: ValueExpr },
    /// `when [ ... ]` block body
    When { expr: WhenExprNode },
    /// `for .. => ..` block body
    For { expr: ForExprNode },
}

impl ExecutableKind {
    pub fn variant_name(&self) -> &'static str {
        match self {
            ExecutableKind::Command { .. } => "command",
            ExecutableKind::Code { .. } => "code",
            ExecutableKind::Template { .. } => "template",
            ExecutableKind::CommandRef { .. } => "commandRef",
            ExecutableKind::Section { .. } => "section",
            ExecutableKind::Resolver { .. } => "resolver",
            ExecutableKind::Pipeline { .. } => "pipeline",
            ExecutableKind::Data { .. } => "data",
            ExecutableKind::When { .. } => "when",
            ExecutableKind::For { .. } => "for",
        }
    }
}

/// A complete callable definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableDefinition {
    pub kind: ExecutableKind,
    pub params: Vec<String>,
    pub source_directive: SourceDirective,
    pub with_clause: Option<WithClause>,
    /// User bindings of the defining module, snapshotted at import time
    pub captured_module_env: Option<IndexMap<String, Variable>>,
    pub shadow_envs: ShadowEnvs,
    pub security: SecurityDescriptor,
}

impl ExecutableDefinition {
    pub fn new(kind: ExecutableKind, params: Vec<String>, source_directive: SourceDirective) -> Self {
        Self {
            kind,
            params,
            source_directive,
            with_clause: None,
            captured_module_env: None,
            shadow_envs: ShadowEnvs::default(),
            security: SecurityDescriptor::clean(),
        }
    }

    pub fn with_clause(mut self, with_clause: Option<WithClause>) -> Self {
        self.with_clause = with_clause;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TemplateKind;

    #[test]
    fn test_variant_names() {
        let def = ExecutableDefinition::new(
            ExecutableKind::Template {
                template: TemplateNode::literal(TemplateKind::Backtick, "hi"),
            },
            vec!["a".into()],
            SourceDirective::Exe,
        );
        assert_eq!(def.kind.variant_name(), "template");
        assert_eq!(def.params, vec!["a".to_string()]);
    }
}
