//! Python Adapter
//!
//! Writes the code to a temp file with JSON-literal parameter
//! pre-assignments, invokes `python3`, and removes the file afterwards even
//! when the run fails. The invocation's stdout is its result text.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ErrorContext, MlldError, Result};

use super::js::{CodeOutput, CodeRequest};
use super::process::{run, SpawnSpec};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Indent a block for embedding under a `def`.
fn indent(source: &str) -> String {
    source
        .lines()
        .map(|l| format!("    {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the temp-file program: imports, shadow defs, parameter
/// pre-assignments, then the user code.
pub fn build_python_program(req: &CodeRequest) -> String {
    let mut program = String::from("import json\nimport sys\n");
    for (name, (params, source)) in &req.shadow {
        program.push_str(&format!(
            "def {}({}):\n{}\n",
            name,
            params.join(", "),
            indent(source)
        ));
    }
    for (name, value) in &req.params {
        // Double-encoded JSON is a valid Python string literal
        let json_text = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
        let py_literal = serde_json::to_string(&json_text).unwrap_or_else(|_| "\"null\"".to_string());
        program.push_str(&format!("{} = json.loads({})\n", name, py_literal));
    }
    program.push_str(&req.source);
    program.push('\n');
    program
}

/// Run python code via a temp file under python3.
pub async fn run_python(req: CodeRequest) -> Result<CodeOutput> {
    let program = build_python_program(&req);
    let path = std::env::temp_dir().join(format!(
        "mlld-code-{}-{}.py",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    let path_str = path.to_string_lossy().into_owned();

    tokio::fs::write(&path, &program).await.map_err(|e| MlldError::Io {
        operation: "write temp code".to_string(),
        message: format!("{}: {}", path_str, e),
        ctx: ErrorContext::default(),
    })?;

    let mut spec = SpawnSpec::new("python3");
    spec.args = vec![path_str.clone()];
    spec.stdin = req.stdin.clone();
    spec.cwd = req.cwd.clone();
    spec.timeout_secs = req.timeout_secs;
    spec.label = "python code".to_string();

    let result = run(spec).await;
    let _ = tokio::fs::remove_file(&path).await;
    let out = result?;

    if out.exit_code != 0 {
        return Err(MlldError::CodeException {
            language: "python".to_string(),
            message: if out.stderr.trim().is_empty() {
                format!("exited with status {}", out.exit_code)
            } else {
                out.stderr.trim().to_string()
            },
            ctx: ErrorContext::default(),
        });
    }

    Ok(CodeOutput {
        result: serde_json::Value::String(out.stdout.clone()),
        logs: Vec::new(),
        stderr: out.stderr,
        exit_code: out.exit_code,
    })
}
