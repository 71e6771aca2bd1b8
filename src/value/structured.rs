//! Structured Values
//!
//! The wrapper produced whenever an executable or transformer returns a
//! non-primitive, and whenever JSON-valued text is re-parsed. It carries a
//! text projection and a data projection that agree: `text` is the canonical
//! JSON serialization of `data` (or the verbatim string for text wrappers),
//! and `as_data` on a text wrapper re-parses lazily.

use serde_json::Value;

use super::security::SecurityDescriptor;

/// Shape tag of a structured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredKind {
    Text,
    Array,
    Object,
}

impl StructuredKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructuredKind::Text => "text",
            StructuredKind::Array => "array",
            StructuredKind::Object => "object",
        }
    }
}

/// Wrapper `{ kind, text, data, security }` with both projections.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredValue {
    pub kind: StructuredKind,
    pub text: String,
    pub data: Value,
    pub security: SecurityDescriptor,
    /// Provenance tag from the producing adapter (e.g. "command", "js")
    pub provenance: Option<String>,
}

impl StructuredValue {
    /// Wrap a verbatim string without parsing.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            kind: StructuredKind::Text,
            data: Value::String(text.clone()),
            text,
            security: SecurityDescriptor::clean(),
            provenance: None,
        }
    }

    /// Wrap an executable's result. Structured values pass through unchanged;
    /// primitives become text wrappers; containers get a canonical JSON text
    /// projection.
    pub fn wrap(value: Value) -> Self {
        match value {
            Value::Array(_) => Self {
                kind: StructuredKind::Array,
                text: canonical_json(&value),
                data: value,
                security: SecurityDescriptor::clean(),
                provenance: None,
            },
            Value::Object(_) => Self {
                kind: StructuredKind::Object,
                text: canonical_json(&value),
                data: value,
                security: SecurityDescriptor::clean(),
                provenance: None,
            },
            Value::String(s) => Self::text(s),
            other => Self {
                kind: StructuredKind::Text,
                text: primitive_text(&other),
                data: other,
                security: SecurityDescriptor::clean(),
                provenance: None,
            },
        }
    }

    /// Attempt to parse text as JSON; `None` when it is not JSON so the
    /// caller can keep the raw string.
    pub fn parse_and_wrap_json(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        // Only treat container-looking text as structured; bare scalars stay raw.
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return None;
        }
        let data: Value = serde_json::from_str(trimmed).ok()?;
        let mut wrapped = Self::wrap(data);
        if wrapped.kind == StructuredKind::Text {
            return None;
        }
        wrapped.text = trimmed.to_string();
        Some(wrapped)
    }

    pub fn with_security(mut self, security: SecurityDescriptor) -> Self {
        self.security = security;
        self
    }

    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = Some(provenance.into());
        self
    }

    /// Text projection. Containers serialize to canonical JSON.
    pub fn as_text(&self) -> &str {
        &self.text
    }

    /// Data projection. Text wrappers re-parse lazily: JSON-parseable text
    /// yields the parsed value, anything else the raw string.
    pub fn as_data(&self) -> Value {
        match self.kind {
            StructuredKind::Text => {
                let trimmed = self.text.trim();
                if trimmed.starts_with('{') || trimmed.starts_with('[') {
                    serde_json::from_str(trimmed)
                        .unwrap_or_else(|_| Value::String(self.text.clone()))
                } else {
                    self.data.clone()
                }
            }
            _ => self.data.clone(),
        }
    }

    /// Absorb another descriptor into this value's own (monotone).
    pub fn absorb_security(&mut self, other: &SecurityDescriptor) {
        self.security = self.security.merge(other);
    }

    pub fn is_truthy(&self) -> bool {
        value_truthy(&self.as_data())
    }
}

/// Canonical JSON: `serde_json::to_string`, no whitespace, object key order
/// is insertion order of evaluation.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Text projection of a primitive without JSON string quoting.
pub fn primitive_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => canonical_json(other),
    }
}

/// Shared truthiness: null, false, "", 0, and empty containers are falsy.
pub fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_primitive_is_text() {
        let v = StructuredValue::wrap(json!(42));
        assert_eq!(v.kind, StructuredKind::Text);
        assert_eq!(v.as_text(), "42");
        assert_eq!(v.as_data(), json!(42));
    }

    #[test]
    fn test_wrap_array_canonical_json() {
        let v = StructuredValue::wrap(json!([1, "a", null]));
        assert_eq!(v.kind, StructuredKind::Array);
        assert_eq!(v.as_text(), r#"[1,"a",null]"#);
    }

    #[test]
    fn test_wrap_object_text_agrees_with_data() {
        let v = StructuredValue::wrap(json!({"x": 1}));
        assert_eq!(v.kind, StructuredKind::Object);
        assert_eq!(serde_json::from_str::<Value>(v.as_text()).unwrap(), v.data);
    }

    #[test]
    fn test_parse_and_wrap_json_container() {
        let v = StructuredValue::parse_and_wrap_json(r#"{"a": [1, 2]}"#).unwrap();
        assert_eq!(v.kind, StructuredKind::Object);
        assert_eq!(v.as_data(), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_parse_and_wrap_json_rejects_plain_text() {
        assert!(StructuredValue::parse_and_wrap_json("hello").is_none());
        assert!(StructuredValue::parse_and_wrap_json("").is_none());
        assert!(StructuredValue::parse_and_wrap_json("{not json").is_none());
    }

    #[test]
    fn test_text_wrapper_lazy_data_projection() {
        let v = StructuredValue::text(r#"["x","y"]"#);
        assert_eq!(v.as_data(), json!(["x", "y"]));
        let raw = StructuredValue::text("plain");
        assert_eq!(raw.as_data(), json!("plain"));
    }

    #[test]
    fn test_wrap_round_trip_idempotent() {
        // wrap(as_data(wrap(x))) == wrap(x) for JSON-serializable values
        for x in [json!(1), json!("s"), json!([1, 2]), json!({"k": true}), json!(null)] {
            let once = StructuredValue::wrap(x.clone());
            let twice = StructuredValue::wrap(once.as_data());
            assert_eq!(once.kind, twice.kind);
            assert_eq!(once.text, twice.text);
            assert_eq!(once.data, twice.data);
        }
    }

    #[test]
    fn test_absorb_security_is_monotone() {
        let mut v = StructuredValue::text("x");
        let d = SecurityDescriptor::tainted("net");
        v.absorb_security(&d);
        assert!(v.security.covers(&d));
    }

    #[test]
    fn test_truthiness() {
        assert!(!value_truthy(&json!(null)));
        assert!(!value_truthy(&json!("")));
        assert!(!value_truthy(&json!(0)));
        assert!(!value_truthy(&json!([])));
        assert!(value_truthy(&json!("ok")));
        assert!(value_truthy(&json!([0])));
    }
}
