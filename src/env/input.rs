//! INPUT Construction
//!
//! Builds the reserved `INPUT` variable from host stdin and environment
//! variables. JSON-object stdin merges with the env map (env vars win);
//! non-object stdin lands under a `content` key alongside the env vars;
//! stdin alone keeps its original shape; env vars alone become the map.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Parse stdin as JSON when possible, otherwise keep the raw string.
fn parse_stdin(stdin: &str) -> Value {
    serde_json::from_str(stdin.trim()).unwrap_or_else(|_| Value::String(stdin.to_string()))
}

fn env_object(env_vars: &HashMap<String, String>) -> Map<String, Value> {
    let mut sorted: Vec<(&String, &String)> = env_vars.iter().collect();
    sorted.sort_by_key(|(k, _)| k.clone());
    sorted
        .into_iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

/// Build the INPUT value per the stdin/env merge rules.
pub fn create_input_value(stdin: Option<&str>, env_vars: &HashMap<String, String>) -> Value {
    match (stdin, env_vars.is_empty()) {
        (None, true) => Value::Object(Map::new()),
        (None, false) => Value::Object(env_object(env_vars)),
        (Some(stdin), true) => parse_stdin(stdin),
        (Some(stdin), false) => {
            let parsed = parse_stdin(stdin);
            match parsed {
                Value::Object(mut obj) => {
                    // Env vars take precedence over stdin keys
                    for (k, v) in env_object(env_vars) {
                        obj.insert(k, v);
                    }
                    Value::Object(obj)
                }
                other => {
                    let mut obj = Map::new();
                    obj.insert("content".to_string(), other);
                    for (k, v) in env_object(env_vars) {
                        obj.insert(k, v);
                    }
                    Value::Object(obj)
                }
            }
        }
    }
}
