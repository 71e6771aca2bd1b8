//! Variables
//!
//! The typed variable model. A variable pairs a name with a tagged value,
//! metadata about the directive that created it, internal runtime flags, and
//! a security descriptor. The tag and the payload always agree because the
//! payload lives inside the tag.

use serde_json::Value;

use crate::ast::{TemplateNode, ValueExpr, WithClause};

use super::executable::ExecutableDefinition;
use super::security::SecurityDescriptor;
use super::structured::{primitive_text, StructuredValue};

/// Tagged variable payload.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    /// Single-quoted text, never interpolated
    SimpleText(String),
    /// Text produced by template interpolation
    InterpolatedText(String),
    /// Stored template, interpolated on demand
    Template(TemplateNode),
    /// number | bool | null
    Primitive(Value),
    Object(Value),
    Array(Value),
    /// Filesystem or URL path
    Path(String),
    Executable(Box<ExecutableDefinition>),
    /// Current stage input inside a pipeline
    PipelineInput(Box<StructuredValue>),
    Structured(Box<StructuredValue>),
    /// Captured subprocess result
    CommandResult {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
}

impl VariableValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            VariableValue::SimpleText(_) => "simple-text",
            VariableValue::InterpolatedText(_) => "interpolated-text",
            VariableValue::Template(_) => "template",
            VariableValue::Primitive(_) => "primitive",
            VariableValue::Object(_) => "object",
            VariableValue::Array(_) => "array",
            VariableValue::Path(_) => "path",
            VariableValue::Executable(_) => "executable",
            VariableValue::PipelineInput(_) => "pipeline-input",
            VariableValue::Structured(_) => "structured",
            VariableValue::CommandResult { .. } => "command-result",
        }
    }

    /// Build the variant matching a JSON value's shape.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => VariableValue::SimpleText(s),
            Value::Array(_) => VariableValue::Array(value),
            Value::Object(_) => VariableValue::Object(value),
            other => VariableValue::Primitive(other),
        }
    }
}

/// How a variable was written in source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariableSource {
    /// Directive kind: "var", "exe", "import", "run", system
    pub directive: String,
    /// Surface syntax: "quoted", "template", "literal", "command", ...
    pub syntax: String,
    pub interpolated: bool,
    pub multiline: bool,
}

impl VariableSource {
    pub fn directive(directive: &str, syntax: &str) -> Self {
        Self {
            directive: directive.to_string(),
            syntax: syntax.to_string(),
            ..Default::default()
        }
    }

    pub fn system() -> Self {
        Self::directive("system", "builtin")
    }
}

/// Retained RHS for values that can be re-executed by a pipeline retry.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFunction {
    pub expr: ValueExpr,
    pub with_clause: Option<WithClause>,
}

/// Internal runtime flags. Never user-settable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariableFlags {
    pub is_system: bool,
    pub is_parameter: bool,
    pub is_reserved: bool,
    pub is_lazy: bool,
    pub is_retryable: bool,
    pub is_imported: bool,
    /// Import origin path, present iff `is_imported`
    pub import_source: Option<String>,
    /// Re-executable RHS for pipeline retry
    pub source_function: Option<Box<SourceFunction>>,
}

/// A named, typed binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: VariableValue,
    pub source: VariableSource,
    pub security: SecurityDescriptor,
    pub flags: VariableFlags,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: VariableValue, source: VariableSource) -> Self {
        Self {
            name: name.into(),
            value,
            source,
            security: SecurityDescriptor::clean(),
            flags: VariableFlags::default(),
        }
    }

    /// A runtime-owned variable; only these may use reserved names.
    pub fn system(name: impl Into<String>, value: VariableValue) -> Self {
        let mut v = Self::new(name, value, VariableSource::system());
        v.flags.is_system = true;
        v.flags.is_reserved = true;
        v
    }

    pub fn parameter(name: impl Into<String>, value: VariableValue) -> Self {
        let mut v = Self::new(name, value, VariableSource::directive("exe", "parameter"));
        v.flags.is_parameter = true;
        v
    }

    pub fn with_security(mut self, security: SecurityDescriptor) -> Self {
        self.security = security;
        self
    }

    pub fn is_executable(&self) -> bool {
        matches!(self.value, VariableValue::Executable(_))
    }

    /// Data projection of the payload.
    pub fn as_json(&self) -> Value {
        match &self.value {
            VariableValue::SimpleText(s)
            | VariableValue::InterpolatedText(s)
            | VariableValue::Path(s) => Value::String(s.clone()),
            VariableValue::Template(_) => Value::Null,
            VariableValue::Primitive(v) | VariableValue::Object(v) | VariableValue::Array(v) => {
                v.clone()
            }
            VariableValue::Executable(_) => Value::Null,
            VariableValue::PipelineInput(s) | VariableValue::Structured(s) => s.as_data(),
            VariableValue::CommandResult { stdout, .. } => Value::String(stdout.clone()),
        }
    }

    /// Text projection of the payload.
    pub fn as_text(&self) -> String {
        match &self.value {
            VariableValue::SimpleText(s)
            | VariableValue::InterpolatedText(s)
            | VariableValue::Path(s) => s.clone(),
            VariableValue::PipelineInput(s) | VariableValue::Structured(s) => {
                s.as_text().to_string()
            }
            VariableValue::CommandResult { stdout, .. } => stdout.clone(),
            other_value => primitive_text(&match other_value {
                VariableValue::Primitive(v)
                | VariableValue::Object(v)
                | VariableValue::Array(v) => v.clone(),
                _ => Value::Null,
            }),
        }
    }

    /// Wrap the payload as a structured value carrying this variable's
    /// descriptor.
    pub fn as_structured(&self) -> StructuredValue {
        let mut sv = match &self.value {
            VariableValue::PipelineInput(s) | VariableValue::Structured(s) => (**s).clone(),
            VariableValue::SimpleText(s)
            | VariableValue::InterpolatedText(s)
            | VariableValue::Path(s) => StructuredValue::text(s.clone()),
            VariableValue::CommandResult { stdout, .. } => StructuredValue::text(stdout.clone()),
            VariableValue::Primitive(v) | VariableValue::Object(v) | VariableValue::Array(v) => {
                StructuredValue::wrap(v.clone())
            }
            VariableValue::Template(_) | VariableValue::Executable(_) => {
                StructuredValue::text(String::new())
            }
        };
        sv.absorb_security(&self.security);
        sv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_and_value_agree() {
        let v = Variable::new(
            "x",
            VariableValue::Array(json!([1, 2])),
            VariableSource::directive("var", "literal"),
        );
        assert_eq!(v.value.type_name(), "array");
        assert_eq!(v.as_json(), json!([1, 2]));
        assert_eq!(v.as_text(), "[1,2]");
    }

    #[test]
    fn test_system_variable_is_reserved() {
        let v = Variable::system("TIME", VariableValue::SimpleText("now".into()));
        assert!(v.flags.is_reserved);
        assert!(v.flags.is_system);
    }

    #[test]
    fn test_parameter_flag() {
        let v = Variable::parameter("a", VariableValue::SimpleText("1".into()));
        assert!(v.flags.is_parameter);
        assert!(!v.flags.is_reserved);
    }

    #[test]
    fn test_structured_projection_carries_security() {
        let v = Variable::new(
            "x",
            VariableValue::SimpleText("data".into()),
            VariableSource::directive("var", "quoted"),
        )
        .with_security(SecurityDescriptor::tainted("a.mld"));
        let sv = v.as_structured();
        assert!(sv.security.covers(&v.security));
    }

    #[test]
    fn test_from_json_picks_variant() {
        assert_eq!(VariableValue::from_json(json!("s")).type_name(), "simple-text");
        assert_eq!(VariableValue::from_json(json!([1])).type_name(), "array");
        assert_eq!(VariableValue::from_json(json!({})).type_name(), "object");
        assert_eq!(VariableValue::from_json(json!(3)).type_name(), "primitive");
    }
}
