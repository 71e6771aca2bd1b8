//! Field Access
//!
//! Accessor-chain evaluation over plain JSON values. Missing keys yield
//! "undefined" (`None`), and an undefined receiver short-circuits the rest
//! of the chain. Method calls dispatch to the builtin enum; type checks are
//! meaningful even on undefined receivers.

use serde_json::{json, Value};

use crate::error::{ErrorContext, MlldError, Result};

use super::builtins::{apply, BuiltinMethod};

/// An accessor whose dynamic parts (computed keys, call arguments) have
/// already been evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAccessor {
    Field(String),
    Index(i64),
    /// Key computed by a sub-expression
    Key(Value),
    Call { name: String, args: Vec<Value> },
}

fn index_array(items: &[Value], idx: i64) -> Option<Value> {
    let len = items.len() as i64;
    let idx = if idx < 0 { len + idx } else { idx };
    if idx < 0 || idx >= len {
        None
    } else {
        items.get(idx as usize).cloned()
    }
}

/// Apply one accessor. `None` in and out means undefined.
pub fn access(receiver: Option<&Value>, accessor: &ResolvedAccessor) -> Result<Option<Value>> {
    match accessor {
        ResolvedAccessor::Field(name) => Ok(receiver.and_then(|v| match v {
            Value::Object(map) => map.get(name).cloned(),
            _ => None,
        })),
        ResolvedAccessor::Index(idx) => Ok(receiver.and_then(|v| match v {
            Value::Array(items) => index_array(items, *idx),
            // Strings index as characters only through the slice builtins
            _ => None,
        })),
        ResolvedAccessor::Key(key) => Ok(receiver.and_then(|v| match (v, key) {
            (Value::Object(map), Value::String(k)) => map.get(k).cloned(),
            (Value::Array(items), Value::Number(n)) => {
                n.as_i64().and_then(|idx| index_array(items, idx))
            }
            (Value::Object(map), Value::Number(n)) => map.get(&n.to_string()).cloned(),
            _ => None,
        })),
        ResolvedAccessor::Call { name, args } => {
            let method = BuiltinMethod::from_name(name).ok_or_else(|| MlldError::UnknownCommand {
                name: name.clone(),
                ctx: ErrorContext::default(),
            })?;
            match receiver {
                Some(value) => apply(method, value, args).map(Some),
                // Type checks answer on undefined; other calls short-circuit
                None => match method {
                    BuiltinMethod::IsDefined => Ok(Some(json!(false))),
                    BuiltinMethod::IsArray
                    | BuiltinMethod::IsObject
                    | BuiltinMethod::IsString
                    | BuiltinMethod::IsNumber
                    | BuiltinMethod::IsBoolean
                    | BuiltinMethod::IsNull => Ok(Some(json!(false))),
                    _ => Ok(None),
                },
            }
        }
    }
}

/// Walk a whole accessor chain.
pub fn access_path(value: &Value, accessors: &[ResolvedAccessor]) -> Result<Option<Value>> {
    let mut current: Option<Value> = Some(value.clone());
    for accessor in accessors {
        current = access(current.as_ref(), accessor)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_and_index() {
        let v = json!({"list": [10, 20, 30]});
        let out = access_path(
            &v,
            &[
                ResolvedAccessor::Field("list".into()),
                ResolvedAccessor::Index(-1),
            ],
        )
        .unwrap();
        assert_eq!(out, Some(json!(30)));
    }

    #[test]
    fn test_missing_key_is_undefined() {
        let v = json!({"a": 1});
        assert_eq!(
            access_path(&v, &[ResolvedAccessor::Field("b".into())]).unwrap(),
            None
        );
    }

    #[test]
    fn test_undefined_chain_short_circuits() {
        let v = json!({"a": 1});
        let out = access_path(
            &v,
            &[
                ResolvedAccessor::Field("missing".into()),
                ResolvedAccessor::Field("deeper".into()),
                ResolvedAccessor::Index(0),
            ],
        )
        .unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn test_computed_key() {
        let v = json!({"k": "v", "arr": ["a", "b"]});
        assert_eq!(
            access_path(
                &v,
                &[ResolvedAccessor::Key(json!("k"))]
            )
            .unwrap(),
            Some(json!("v"))
        );
        assert_eq!(
            access_path(
                &v,
                &[
                    ResolvedAccessor::Field("arr".into()),
                    ResolvedAccessor::Key(json!(1))
                ]
            )
            .unwrap(),
            Some(json!("b"))
        );
    }

    #[test]
    fn test_string_not_indexable() {
        let v = json!("hello");
        assert_eq!(access_path(&v, &[ResolvedAccessor::Index(0)]).unwrap(), None);
    }

    #[test]
    fn test_method_call_in_chain() {
        let v = json!("HELLO, WORLD");
        let out = access_path(
            &v,
            &[
                ResolvedAccessor::Call {
                    name: "split".into(),
                    args: vec![json!(", ")],
                },
                ResolvedAccessor::Index(1),
                ResolvedAccessor::Call {
                    name: "toLowerCase".into(),
                    args: vec![],
                },
            ],
        )
        .unwrap();
        assert_eq!(out, Some(json!("world")));
    }

    #[test]
    fn test_is_defined_on_undefined() {
        let v = json!({});
        let out = access_path(
            &v,
            &[
                ResolvedAccessor::Field("missing".into()),
                ResolvedAccessor::Call {
                    name: "isDefined".into(),
                    args: vec![],
                },
            ],
        )
        .unwrap();
        assert_eq!(out, Some(json!(false)));
    }

    #[test]
    fn test_unknown_method_errors() {
        let v = json!("x");
        let err = access_path(
            &v,
            &[ResolvedAccessor::Call {
                name: "mystery".into(),
                args: vec![],
            }],
        )
        .unwrap_err();
        assert!(matches!(err, MlldError::UnknownCommand { .. }));
    }
}
