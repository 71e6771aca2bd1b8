//! Reserved Variables
//!
//! Runtime-owned names seeded into every root scope: `INPUT`, `TIME`,
//! `PROJECTPATH`, `DEBUG`, `fm`, `frontmatter`. `DEBUG` is lazy and
//! materialized on first access; `input`/`time`/`debug` are lowercase
//! aliases resolved at the root only.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::value::{Variable, VariableValue};

use super::config::EvalConfig;

lazy_static::lazy_static! {
    pub static ref RESERVED_NAMES: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("INPUT");
        s.insert("TIME");
        s.insert("PROJECTPATH");
        s.insert("DEBUG");
        s.insert("fm");
        s.insert("frontmatter");
        s
    };
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(name)
}

/// Map a lowercase alias to its reserved name, if it is one.
pub fn alias_of(name: &str) -> Option<&'static str> {
    match name {
        "input" => Some("INPUT"),
        "time" => Some("TIME"),
        "debug" => Some("DEBUG"),
        _ => None,
    }
}

/// Current timestamp, honoring the mock clock.
pub fn time_value(config: &EvalConfig) -> String {
    config
        .mock_time
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339())
}

/// The variables seeded at root construction. `DEBUG` is created lazy.
pub fn seed_variables(config: &EvalConfig, project_path: &str) -> Vec<Variable> {
    let mut vars = vec![
        Variable::system("TIME", VariableValue::SimpleText(time_value(config))),
        Variable::system("PROJECTPATH", VariableValue::Path(project_path.to_string())),
        Variable::system("INPUT", VariableValue::Object(json!({}))),
    ];
    let mut debug = Variable::system("DEBUG", VariableValue::Primitive(Value::Null));
    debug.flags.is_lazy = true;
    vars.push(debug);
    vars
}

/// The `fm`/`frontmatter` pair from a document's YAML frontmatter.
pub fn frontmatter_variables(frontmatter: &str) -> Vec<Variable> {
    let data: Value = serde_yaml::from_str::<serde_yaml::Value>(frontmatter)
        .ok()
        .and_then(|y| serde_json::to_value(y).ok())
        .unwrap_or(Value::Null);
    let value = match data {
        Value::Null => json!({}),
        other => other,
    };
    vec![
        Variable::system("fm", VariableValue::Object(value.clone())),
        Variable::system("frontmatter", VariableValue::Object(value)),
    ]
}

/// Materialize the lazy `DEBUG` payload: a snapshot of evaluator state.
pub fn debug_value(variable_names: Vec<String>, config: &EvalConfig) -> Value {
    json!({
        "variables": variable_names,
        "mockTime": config.mock_time.is_some(),
        "testMode": config.test_mode,
    })
}
