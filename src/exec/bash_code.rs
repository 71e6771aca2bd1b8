//! Bash/Sh Code Adapter
//!
//! Pipes the user code to the shell on stdin with parameters exposed as
//! environment variables. When the executable declared no parameters the
//! caller injects all simple-text variables instead, matching the inline
//! `sh { ... }` convention.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::Result;
use crate::value::{canonical_json, primitive_text};

use super::js::{CodeOutput, CodeRequest};
use super::process::{run, SpawnSpec};

/// Run bash or sh code. `program` is "bash" or "sh".
pub async fn run_shell_code(program: &str, req: CodeRequest) -> Result<CodeOutput> {
    let mut spec = SpawnSpec::new(program);
    spec.args = vec!["-s".into()];
    spec.env = env_map(&req.params);
    if let Some(stdin) = &req.stdin {
        spec.env.insert("MLLD_STDIN".into(), stdin.clone());
    }
    spec.stdin = Some(req.source.clone());
    spec.cwd = req.cwd.clone();
    spec.timeout_secs = req.timeout_secs;
    spec.label = format!("{} code", program);

    let out = run(spec).await?;
    Ok(CodeOutput {
        result: Value::String(out.stdout.clone()),
        logs: Vec::new(),
        stderr: out.stderr,
        exit_code: out.exit_code,
    })
}

fn env_map(params: &IndexMap<String, Value>) -> std::collections::HashMap<String, String> {
    params
        .iter()
        .map(|(name, value)| {
            let text = match value {
                Value::Array(_) | Value::Object(_) => canonical_json(value),
                other => primitive_text(other),
            };
            (name.clone(), text)
        })
        .collect()
}
