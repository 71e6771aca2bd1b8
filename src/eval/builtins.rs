//! Builtin Methods
//!
//! Method-style builtins dispatched on a closed enum: string transforms,
//! array operations, shared query methods, and type checks. Semantics follow
//! JavaScript on plain values; `length` works on both strings and arrays.

use regex_lite::Regex;
use serde_json::{json, Value};

use crate::error::{ErrorContext, MlldError, Result};
use crate::value::primitive_text;

/// Closed set of builtin methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinMethod {
    // strings
    ToLowerCase,
    ToUpperCase,
    Trim,
    Slice,
    Substring,
    Substr,
    Replace,
    ReplaceAll,
    PadStart,
    PadEnd,
    Repeat,
    // arrays
    Concat,
    Reverse,
    Sort,
    // common
    Length,
    Join,
    Split,
    Includes,
    IndexOf,
    StartsWith,
    EndsWith,
    Match,
    // type checks
    IsArray,
    IsObject,
    IsString,
    IsNumber,
    IsBoolean,
    IsNull,
    IsDefined,
}

impl BuiltinMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "toLowerCase" => Self::ToLowerCase,
            "toUpperCase" => Self::ToUpperCase,
            "trim" => Self::Trim,
            "slice" => Self::Slice,
            "substring" => Self::Substring,
            "substr" => Self::Substr,
            "replace" => Self::Replace,
            "replaceAll" => Self::ReplaceAll,
            "padStart" => Self::PadStart,
            "padEnd" => Self::PadEnd,
            "repeat" => Self::Repeat,
            "concat" => Self::Concat,
            "reverse" => Self::Reverse,
            "sort" => Self::Sort,
            "length" => Self::Length,
            "join" => Self::Join,
            "split" => Self::Split,
            "includes" => Self::Includes,
            "indexOf" => Self::IndexOf,
            "startsWith" => Self::StartsWith,
            "endsWith" => Self::EndsWith,
            "match" => Self::Match,
            "isArray" => Self::IsArray,
            "isObject" => Self::IsObject,
            "isString" => Self::IsString,
            "isNumber" => Self::IsNumber,
            "isBoolean" => Self::IsBoolean,
            "isNull" => Self::IsNull,
            "isDefined" => Self::IsDefined,
            _ => return None,
        })
    }

    pub fn is_builtin_name(name: &str) -> bool {
        Self::from_name(name).is_some()
    }
}

fn type_error(method: &str, expected: &str, actual: &Value) -> MlldError {
    MlldError::TypeMismatch {
        expected: format!("{} for .{}()", expected, method),
        actual: match actual {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "boolean".to_string(),
            Value::Number(_) => "number".to_string(),
            Value::String(_) => "string".to_string(),
            Value::Array(_) => "array".to_string(),
            Value::Object(_) => "object".to_string(),
        },
        ctx: ErrorContext::default(),
    }
}

fn as_str<'a>(method: &str, v: &'a Value) -> Result<&'a str> {
    v.as_str().ok_or_else(|| type_error(method, "string", v))
}

fn arg_i64(args: &[Value], idx: usize) -> Option<i64> {
    args.get(idx).and_then(Value::as_i64)
}

fn arg_str<'a>(args: &'a [Value], idx: usize) -> Option<&'a str> {
    args.get(idx).and_then(Value::as_str)
}

/// JS-style slice index clamping: negatives count from the end.
fn clamp_index(idx: i64, len: usize) -> usize {
    let len = len as i64;
    let idx = if idx < 0 { len + idx } else { idx };
    idx.clamp(0, len) as usize
}

/// Apply a builtin to a receiver value.
pub fn apply(method: BuiltinMethod, receiver: &Value, args: &[Value]) -> Result<Value> {
    use BuiltinMethod::*;
    match method {
        ToLowerCase => Ok(json!(as_str("toLowerCase", receiver)?.to_lowercase())),
        ToUpperCase => Ok(json!(as_str("toUpperCase", receiver)?.to_uppercase())),
        Trim => Ok(json!(as_str("trim", receiver)?.trim())),

        Slice => match receiver {
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let start = clamp_index(arg_i64(args, 0).unwrap_or(0), chars.len());
                let end = clamp_index(arg_i64(args, 1).unwrap_or(chars.len() as i64), chars.len());
                Ok(json!(chars[start..end.max(start)].iter().collect::<String>()))
            }
            Value::Array(a) => {
                let start = clamp_index(arg_i64(args, 0).unwrap_or(0), a.len());
                let end = clamp_index(arg_i64(args, 1).unwrap_or(a.len() as i64), a.len());
                Ok(Value::Array(a[start..end.max(start)].to_vec()))
            }
            other => Err(type_error("slice", "string or array", other)),
        },

        Substring => {
            let s = as_str("substring", receiver)?;
            let chars: Vec<char> = s.chars().collect();
            let mut start = arg_i64(args, 0).unwrap_or(0).max(0) as usize;
            let mut end = arg_i64(args, 1)
                .map(|e| e.max(0) as usize)
                .unwrap_or(chars.len());
            start = start.min(chars.len());
            end = end.min(chars.len());
            if start > end {
                std::mem::swap(&mut start, &mut end);
            }
            Ok(json!(chars[start..end].iter().collect::<String>()))
        }

        Substr => {
            let s = as_str("substr", receiver)?;
            let chars: Vec<char> = s.chars().collect();
            let start = clamp_index(arg_i64(args, 0).unwrap_or(0), chars.len());
            let len = arg_i64(args, 1).unwrap_or(chars.len() as i64).max(0) as usize;
            let end = (start + len).min(chars.len());
            Ok(json!(chars[start..end].iter().collect::<String>()))
        }

        Replace => {
            let s = as_str("replace", receiver)?;
            let pattern = arg_str(args, 0).unwrap_or("");
            let replacement = arg_str(args, 1).unwrap_or("");
            Ok(json!(s.replacen(pattern, replacement, 1)))
        }

        ReplaceAll => {
            let s = as_str("replaceAll", receiver)?;
            let pattern = arg_str(args, 0).unwrap_or("");
            let replacement = arg_str(args, 1).unwrap_or("");
            Ok(json!(s.replace(pattern, replacement)))
        }

        PadStart => {
            let s = as_str("padStart", receiver)?;
            let target = arg_i64(args, 0).unwrap_or(0).max(0) as usize;
            let pad = arg_str(args, 1).unwrap_or(" ");
            Ok(json!(pad_string(s, target, pad, true)))
        }

        PadEnd => {
            let s = as_str("padEnd", receiver)?;
            let target = arg_i64(args, 0).unwrap_or(0).max(0) as usize;
            let pad = arg_str(args, 1).unwrap_or(" ");
            Ok(json!(pad_string(s, target, pad, false)))
        }

        Repeat => {
            let s = as_str("repeat", receiver)?;
            let count = arg_i64(args, 0).unwrap_or(0).max(0) as usize;
            Ok(json!(s.repeat(count)))
        }

        Concat => match receiver {
            Value::Array(a) => {
                let mut out = a.clone();
                for arg in args {
                    match arg {
                        Value::Array(other) => out.extend(other.clone()),
                        single => out.push(single.clone()),
                    }
                }
                Ok(Value::Array(out))
            }
            Value::String(s) => {
                let mut out = s.clone();
                for arg in args {
                    out.push_str(&primitive_text(arg));
                }
                Ok(json!(out))
            }
            other => Err(type_error("concat", "array or string", other)),
        },

        Reverse => match receiver {
            Value::Array(a) => {
                let mut out = a.clone();
                out.reverse();
                Ok(Value::Array(out))
            }
            other => Err(type_error("reverse", "array", other)),
        },

        Sort => match receiver {
            Value::Array(a) => {
                let mut out = a.clone();
                // JS default sort compares string forms
                out.sort_by(|x, y| primitive_text(x).cmp(&primitive_text(y)));
                Ok(Value::Array(out))
            }
            other => Err(type_error("sort", "array", other)),
        },

        Length => match receiver {
            Value::String(s) => Ok(json!(s.chars().count())),
            Value::Array(a) => Ok(json!(a.len())),
            other => Err(type_error("length", "string or array", other)),
        },

        Join => match receiver {
            Value::Array(a) => {
                let sep = arg_str(args, 0).unwrap_or(",");
                let joined = a
                    .iter()
                    .map(primitive_text)
                    .collect::<Vec<_>>()
                    .join(sep);
                Ok(json!(joined))
            }
            other => Err(type_error("join", "array", other)),
        },

        Split => {
            let s = as_str("split", receiver)?;
            let sep = arg_str(args, 0).unwrap_or("");
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| json!(c.to_string())).collect()
            } else {
                s.split(sep).map(|p| json!(p)).collect()
            };
            Ok(Value::Array(parts))
        }

        Includes => match receiver {
            Value::String(s) => Ok(json!(s.contains(arg_str(args, 0).unwrap_or("")))),
            Value::Array(a) => {
                let needle = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(a.contains(&needle)))
            }
            other => Err(type_error("includes", "string or array", other)),
        },

        IndexOf => match receiver {
            Value::String(s) => {
                let needle = arg_str(args, 0).unwrap_or("");
                let idx = s.find(needle).map(|byte_idx| s[..byte_idx].chars().count());
                Ok(json!(idx.map(|i| i as i64).unwrap_or(-1)))
            }
            Value::Array(a) => {
                let needle = args.first().cloned().unwrap_or(Value::Null);
                let idx = a.iter().position(|v| *v == needle);
                Ok(json!(idx.map(|i| i as i64).unwrap_or(-1)))
            }
            other => Err(type_error("indexOf", "string or array", other)),
        },

        StartsWith => {
            let s = as_str("startsWith", receiver)?;
            Ok(json!(s.starts_with(arg_str(args, 0).unwrap_or(""))))
        }

        EndsWith => {
            let s = as_str("endsWith", receiver)?;
            Ok(json!(s.ends_with(arg_str(args, 0).unwrap_or(""))))
        }

        Match => {
            let s = as_str("match", receiver)?;
            let pattern = arg_str(args, 0).unwrap_or("");
            let regex = Regex::new(pattern).map_err(|e| MlldError::InvalidToolSpec {
                message: format!("invalid regex '{}': {}", pattern, e),
                ctx: ErrorContext::default(),
            })?;
            match regex.captures(s) {
                Some(caps) => {
                    let groups: Vec<Value> = caps
                        .iter()
                        .map(|g| match g {
                            Some(m) => json!(m.as_str()),
                            None => Value::Null,
                        })
                        .collect();
                    Ok(Value::Array(groups))
                }
                None => Ok(Value::Null),
            }
        }

        IsArray => Ok(json!(receiver.is_array())),
        IsObject => Ok(json!(receiver.is_object())),
        IsString => Ok(json!(receiver.is_string())),
        IsNumber => Ok(json!(receiver.is_number())),
        IsBoolean => Ok(json!(receiver.is_boolean())),
        IsNull => Ok(json!(receiver.is_null())),
        IsDefined => Ok(json!(true)),
    }
}

fn pad_string(s: &str, target: usize, pad: &str, at_start: bool) -> String {
    let len = s.chars().count();
    if len >= target || pad.is_empty() {
        return s.to_string();
    }
    let mut fill = String::new();
    while fill.chars().count() < target - len {
        fill.push_str(pad);
    }
    let fill: String = fill.chars().take(target - len).collect();
    if at_start {
        format!("{}{}", fill, s)
    } else {
        format!("{}{}", s, fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, receiver: Value, args: &[Value]) -> Value {
        apply(BuiltinMethod::from_name(name).unwrap(), &receiver, args).unwrap()
    }

    #[test]
    fn test_case_and_trim() {
        assert_eq!(call("toLowerCase", json!("HeLLo"), &[]), json!("hello"));
        assert_eq!(call("toUpperCase", json!("hi"), &[]), json!("HI"));
        assert_eq!(call("trim", json!("  x  "), &[]), json!("x"));
    }

    #[test]
    fn test_slice_with_negatives() {
        assert_eq!(call("slice", json!("hello"), &[json!(-3)]), json!("llo"));
        assert_eq!(
            call("slice", json!([1, 2, 3, 4]), &[json!(1), json!(3)]),
            json!([2, 3])
        );
    }

    #[test]
    fn test_substring_swaps_out_of_order() {
        assert_eq!(
            call("substring", json!("hello"), &[json!(3), json!(1)]),
            json!("el")
        );
    }

    #[test]
    fn test_replace_first_vs_all() {
        assert_eq!(
            call("replace", json!("a-a-a"), &[json!("a"), json!("b")]),
            json!("b-a-a")
        );
        assert_eq!(
            call("replaceAll", json!("a-a-a"), &[json!("a"), json!("b")]),
            json!("b-b-b")
        );
    }

    #[test]
    fn test_padding_and_repeat() {
        assert_eq!(call("padStart", json!("5"), &[json!(3), json!("0")]), json!("005"));
        assert_eq!(call("padEnd", json!("ab"), &[json!(5), json!("xy")]), json!("abxyx"));
        assert_eq!(call("repeat", json!("ab"), &[json!(3)]), json!("ababab"));
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(
            call("concat", json!([1]), &[json!([2, 3]), json!(4)]),
            json!([1, 2, 3, 4])
        );
        assert_eq!(call("reverse", json!([1, 2, 3]), &[]), json!([3, 2, 1]));
        // JS default sort is stringly
        assert_eq!(call("sort", json!([10, 2, 1]), &[]), json!([1, 10, 2]));
    }

    #[test]
    fn test_length() {
        assert_eq!(call("length", json!("héllo"), &[]), json!(5));
        assert_eq!(call("length", json!([1, 2]), &[]), json!(2));
        assert!(apply(BuiltinMethod::Length, &json!({"a": 1}), &[]).is_err());
    }

    #[test]
    fn test_join_split() {
        assert_eq!(call("join", json!(["a", "b"]), &[json!("-")]), json!("a-b"));
        assert_eq!(call("join", json!([1, 2]), &[]), json!("1,2"));
        assert_eq!(
            call("split", json!("a, b"), &[json!(", ")]),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_search_methods() {
        assert_eq!(call("includes", json!("hello"), &[json!("ell")]), json!(true));
        assert_eq!(call("includes", json!([1, 2]), &[json!(2)]), json!(true));
        assert_eq!(call("indexOf", json!("abc"), &[json!("c")]), json!(2));
        assert_eq!(call("indexOf", json!([5, 6]), &[json!(7)]), json!(-1));
        assert_eq!(call("startsWith", json!("abc"), &[json!("ab")]), json!(true));
        assert_eq!(call("endsWith", json!("abc"), &[json!("bc")]), json!(true));
    }

    #[test]
    fn test_match_groups() {
        assert_eq!(
            call("match", json!("v1.2"), &[json!(r"v(\d+)\.(\d+)")]),
            json!(["v1.2", "1", "2"])
        );
        assert_eq!(call("match", json!("none"), &[json!(r"\d+")]), json!(null));
    }

    #[test]
    fn test_type_checks() {
        assert_eq!(call("isArray", json!([]), &[]), json!(true));
        assert_eq!(call("isObject", json!({}), &[]), json!(true));
        assert_eq!(call("isString", json!("x"), &[]), json!(true));
        assert_eq!(call("isNumber", json!(1.5), &[]), json!(true));
        assert_eq!(call("isBoolean", json!(false), &[]), json!(true));
        assert_eq!(call("isNull", json!(null), &[]), json!(true));
        assert_eq!(call("isDefined", json!(null), &[]), json!(true));
    }

    #[test]
    fn test_unknown_name() {
        assert!(BuiltinMethod::from_name("mystery").is_none());
        assert!(BuiltinMethod::is_builtin_name("slice"));
    }
}
