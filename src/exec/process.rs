//! Subprocess Runner
//!
//! Shared spawn/timeout/IO plumbing for all execution adapters. Children get
//! a private env map, an optional stdin string, a working directory, and a
//! deadline; on expiry the child is killed and `CommandTimeout` is raised.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{ErrorContext, MlldError, Result};

/// Captured output of a finished child process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawn parameters for one child process.
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub stdin: Option<String>,
    pub cwd: Option<String>,
    pub timeout_secs: u64,
    /// Label used in error messages (the user-visible command or language)
    pub label: String,
}

impl SpawnSpec {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            label: program.clone(),
            program,
            args: Vec::new(),
            env: HashMap::new(),
            stdin: None,
            cwd: None,
            timeout_secs: 30,
        }
    }
}

/// Run a child to completion under a deadline.
pub async fn run(spec: SpawnSpec) -> Result<ExecOutput> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|e| MlldError::Io {
        operation: "spawn".to_string(),
        message: format!("{}: {}", spec.program, e),
        ctx: ErrorContext {
            working_dir: spec.cwd.clone(),
            ..Default::default()
        },
    })?;

    if let Some(stdin_content) = &spec.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            let bytes = stdin_content.clone().into_bytes();
            // Write before waiting so small pipes don't deadlock on large input
            tokio::spawn(async move {
                let _ = stdin.write_all(&bytes).await;
                let _ = stdin.shutdown().await;
            });
        }
    } else {
        drop(child.stdin.take());
    }

    let deadline = Duration::from_secs(spec.timeout_secs.max(1));
    let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| MlldError::Io {
            operation: "wait".to_string(),
            message: e.to_string(),
            ctx: ErrorContext::default(),
        })?,
        Err(_) => {
            return Err(MlldError::CommandTimeout {
                command: spec.label,
                seconds: spec.timeout_secs,
                ctx: ErrorContext {
                    working_dir: spec.cwd,
                    ..Default::default()
                },
            });
        }
    };

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
