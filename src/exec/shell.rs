//! Shell Command Adapter
//!
//! Runs an interpolated command string under `sh -c`. Parameters referenced
//! in the command as `$name`/`${name}` are passed as environment variables
//! (JSON-serialized for containers); unreferenced parameters are skipped to
//! keep the child env small. When a referenced value exceeds the configured
//! size threshold the adapter rebuilds the invocation as a bash program that
//! defines the variables from heredocs on stdin.

use std::collections::HashMap;

use indexmap::IndexMap;
use regex_lite::Regex;
use serde_json::Value;

use crate::error::Result;
use crate::value::{canonical_json, primitive_text};

use super::process::{run, ExecOutput, SpawnSpec};

lazy_static::lazy_static! {
    static ref ENV_REF: Regex = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").unwrap();
}

/// One shell invocation.
pub struct CommandRequest {
    /// Fully interpolated command text
    pub command: String,
    /// Named parameters available as `$name` references
    pub params: IndexMap<String, Value>,
    pub stdin: Option<String>,
    pub cwd: Option<String>,
    pub timeout_secs: u64,
    /// Byte threshold above which the heredoc fallback kicks in
    pub max_env_var_size: usize,
    pub heredoc_fallback: bool,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: IndexMap::new(),
            stdin: None,
            cwd: None,
            timeout_secs: 30,
            max_env_var_size: 128 * 1024,
            heredoc_fallback: true,
        }
    }
}

/// Serialize a parameter for the shell boundary: strings verbatim, other
/// primitives via their text form, containers as canonical JSON.
fn serialize_param(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => canonical_json(value),
        other => primitive_text(other),
    }
}

/// Names referenced in the command via `$name` or `${name}`, in order.
pub fn referenced_params(command: &str, params: &IndexMap<String, Value>) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in ENV_REF.captures_iter(command) {
        let name = cap[1].to_string();
        if params.contains_key(&name) && !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Pick a heredoc delimiter that does not occur in the value.
fn heredoc_delimiter(name: &str, value: &str) -> String {
    let mut delim = format!("MLLD_{}_EOF", name.to_uppercase());
    while value.contains(&delim) {
        delim.push('_');
    }
    delim
}

/// Build the bash program for the oversized-parameter path: each referenced
/// variable is defined from a quoted heredoc, then the original command runs
/// with `"$name"` expansion intact.
pub fn build_heredoc_script(command: &str, params: &[(String, String)]) -> String {
    let mut script = String::new();
    for (name, value) in params {
        let delim = heredoc_delimiter(name, value);
        script.push_str(&format!("{}=$(cat <<'{}'\n{}\n{}\n)\n", name, delim, value, delim));
    }
    script.push_str(command);
    script.push('\n');
    script
}

/// Execute the command, choosing the env-var or heredoc path by size.
pub async fn run_command(req: CommandRequest) -> Result<ExecOutput> {
    let referenced = referenced_params(&req.command, &req.params);
    let serialized: Vec<(String, String)> = referenced
        .iter()
        .map(|name| (name.clone(), serialize_param(&req.params[name.as_str()])))
        .collect();

    let oversized = serialized
        .iter()
        .any(|(_, v)| v.len() > req.max_env_var_size);

    let spec = if oversized && req.heredoc_fallback {
        let script = build_heredoc_script(&req.command, &serialized);
        let mut spec = SpawnSpec::new("bash");
        spec.args = vec!["-s".into()];
        // The script occupies the stdin pipe; caller stdin is exposed to the
        // command as $MLLD_STDIN instead.
        if let Some(user_stdin) = &req.stdin {
            spec.env.insert("MLLD_STDIN".into(), user_stdin.clone());
        }
        spec.stdin = Some(script);
        spec.label = req.command.clone();
        spec
    } else {
        let mut env: HashMap<String, String> = HashMap::new();
        for (name, value) in &serialized {
            env.insert(name.clone(), value.clone());
        }
        let mut spec = SpawnSpec::new("sh");
        spec.args = vec!["-c".into(), req.command.clone()];
        spec.env = env;
        spec.stdin = req.stdin.clone();
        spec.label = req.command.clone();
        spec
    };

    let mut spec = spec;
    spec.cwd = req.cwd;
    spec.timeout_secs = req.timeout_secs;
    run(spec).await
}
