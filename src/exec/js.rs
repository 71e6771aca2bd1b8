//! JS/Node Adapter
//!
//! Generates a Node program that binds parameters from JSON literals,
//! captures `console.log` output, wraps bare-expression bodies in
//! `return ( … )`, restores `console.log` before reporting, and prints the
//! function result behind a sentinel for the evaluator to split out.
//! Captured js shadow executables are injected as function definitions.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{ErrorContext, MlldError, Result};

use super::process::{run, SpawnSpec};

const RESULT_SENTINEL: &str = "__MLLD_RESULT__";

/// A code invocation for any code adapter.
pub struct CodeRequest {
    pub source: String,
    pub params: IndexMap<String, Value>,
    /// Shadow helpers: name → (params, source)
    pub shadow: IndexMap<String, (Vec<String>, String)>,
    pub stdin: Option<String>,
    pub cwd: Option<String>,
    pub timeout_secs: u64,
}

impl CodeRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            params: IndexMap::new(),
            shadow: IndexMap::new(),
            stdin: None,
            cwd: None,
            timeout_secs: 30,
        }
    }
}

/// Result of a code invocation: the returned value plus captured prints.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeOutput {
    pub result: Value,
    pub logs: Vec<String>,
    pub stderr: String,
    pub exit_code: i32,
}

/// A body with no statements is treated as an expression to return.
pub fn is_bare_expression(source: &str) -> bool {
    let trimmed = source.trim();
    !trimmed.is_empty()
        && !trimmed.contains('\n')
        && !trimmed.contains(';')
        && !trimmed.contains("return")
}

/// Build the Node program for one invocation.
pub fn build_js_program(req: &CodeRequest) -> String {
    let body = if is_bare_expression(&req.source) {
        format!("return ( {} );", req.source.trim())
    } else {
        req.source.clone()
    };

    let param_names: Vec<&str> = req.params.keys().map(String::as_str).collect();
    let args_json = serde_json::to_string(&req.params.values().cloned().collect::<Vec<_>>())
        .unwrap_or_else(|_| "[]".to_string());

    let mut program = String::new();
    program.push_str("\"use strict\";\n");
    program.push_str("const __logs = [];\n");
    program.push_str("const __log = console.log;\n");
    program.push_str(
        "console.log = (...args) => { __logs.push(args.map(a => typeof a === \"string\" ? a : JSON.stringify(a)).join(\" \")); };\n",
    );
    for (name, (params, source)) in &req.shadow {
        program.push_str(&format!(
            "function {}({}) {{\n{}\n}}\n",
            name,
            params.join(", "),
            source
        ));
    }
    program.push_str(&format!(
        "const __fn = async ({}) => {{\n{}\n}};\n",
        param_names.join(", "),
        body
    ));
    program.push_str(&format!("const __args = {};\n", args_json));
    program.push_str("(async () => {\n");
    program.push_str("  let __result;\n");
    program.push_str("  try {\n");
    program.push_str("    __result = await __fn(...__args);\n");
    program.push_str("  } finally {\n");
    program.push_str("    console.log = __log;\n");
    program.push_str("  }\n");
    program.push_str(&format!(
        "  process.stdout.write(\"{}\" + JSON.stringify({{ result: __result === undefined ? null : __result, logs: __logs }}));\n",
        RESULT_SENTINEL
    ));
    program.push_str("})().catch(err => { console.error(String(err && err.stack || err)); process.exit(1); });\n");
    program
}

/// Split the sentinel report back out of the child's stdout.
fn parse_output(stdout: &str, stderr: String, exit_code: i32) -> Result<CodeOutput> {
    if exit_code != 0 {
        return Err(MlldError::CodeException {
            language: "js".to_string(),
            message: if stderr.trim().is_empty() {
                format!("exited with status {}", exit_code)
            } else {
                stderr.trim().to_string()
            },
            ctx: ErrorContext::default(),
        });
    }
    let idx = stdout.rfind(RESULT_SENTINEL).ok_or_else(|| MlldError::CodeException {
        language: "js".to_string(),
        message: "missing result report".to_string(),
        ctx: ErrorContext::default(),
    })?;
    let report: Value =
        serde_json::from_str(&stdout[idx + RESULT_SENTINEL.len()..]).map_err(|e| {
            MlldError::CodeException {
                language: "js".to_string(),
                message: format!("malformed result report: {}", e),
                ctx: ErrorContext::default(),
            }
        })?;
    let logs = report["logs"]
        .as_array()
        .map(|a| {
            a.iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default();
    Ok(CodeOutput {
        result: report["result"].clone(),
        logs,
        stderr,
        exit_code,
    })
}

/// Run js code under node.
pub async fn run_js(req: CodeRequest) -> Result<CodeOutput> {
    let program = build_js_program(&req);
    let mut spec = SpawnSpec::new("node");
    spec.args = vec!["-".into()];
    spec.stdin = Some(program);
    spec.cwd = req.cwd.clone();
    spec.timeout_secs = req.timeout_secs;
    spec.label = "js code".to_string();
    if let Some(stdin) = &req.stdin {
        spec.env.insert("MLLD_STDIN".into(), stdin.clone());
    }
    let out = run(spec).await?;
    parse_output(&out.stdout, out.stderr, out.exit_code)
}
