//! Filesystem Implementations
//!
//! A real filesystem backed by tokio::fs and an in-memory filesystem for
//! tests and sandboxed hosts.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ErrorContext, MlldError, Result};

use super::types::FilesystemOps;

fn io_error(operation: &str, path: &str, err: impl std::fmt::Display) -> MlldError {
    MlldError::Io {
        operation: operation.to_string(),
        message: format!("{}: {}", path, err),
        ctx: ErrorContext::default(),
    }
}

/// Filesystem that talks to the host OS.
pub struct RealFs;

#[async_trait]
impl FilesystemOps for RealFs {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MlldError::PathNotFound {
                    path: path.to_string(),
                    ctx: ErrorContext::default(),
                }
            } else {
                io_error("read", path, e)
            }
        })
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| io_error("write", path, e))
    }
}

/// In-memory filesystem keyed by normalized path.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<HashMap<String, String>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, creating or replacing.
    pub fn add_file(&self, path: impl Into<String>, contents: impl Into<String>) {
        self.files
            .lock()
            .unwrap()
            .insert(normalize(&path.into()), contents.into());
    }
}

/// Collapse `.`/`..` segments and backslashes so cycle detection compares
/// like with like.
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if out.last().map_or(true, |s| *s == "..") && !absolute {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            seg => out.push(seg),
        }
    }
    let joined = out.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Join a base directory and a relative path.
pub fn join(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else if base.is_empty() {
        normalize(path)
    } else {
        normalize(&format!("{}/{}", base, path))
    }
}

/// Directory component of a path.
pub fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}

#[async_trait]
impl FilesystemOps for MemoryFs {
    async fn exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(&normalize(path))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| MlldError::PathNotFound {
                path: path.to_string(),
                ctx: ErrorContext::default(),
            })
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(normalize(path), contents.to_string());
        Ok(())
    }
}
