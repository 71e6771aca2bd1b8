//! Capability Traits
//!
//! The seams between the evaluator and its host: filesystem, path
//! resolution, URL fetching, module resolution, guard hooks, and streaming.
//! Each capability is a trait object handed to the root environment; no
//! singletons.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{ErrorContext, MlldError, Result};
use crate::value::StructuredValue;

/// Filesystem access for reads, writes, and existence checks. Paths are
/// already resolved by the evaluator.
#[async_trait]
pub trait FilesystemOps: Send + Sync {
    async fn exists(&self, path: &str) -> bool;
    async fn read_file(&self, path: &str) -> Result<String>;
    async fn write_file(&self, path: &str, contents: &str) -> Result<()>;
}

/// Path classification produced by the path service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    File,
    Url,
}

/// A resolved path or URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    pub original: String,
    pub validated: String,
    pub content_type: ContentType,
}

/// Fetched URL content plus response headers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchedContent {
    pub content: String,
    pub headers: HashMap<String, String>,
}

/// URL fetching. The engine never talks to the network directly; the host
/// supplies this capability (and may back it with a cache).
#[async_trait]
pub trait FetchOps: Send + Sync {
    async fn fetch_url(&self, url: &str, bypass_cache: bool) -> Result<FetchedContent>;
}

/// Default fetch capability: refuses everything. Hosts that want network
/// access install their own implementation.
pub struct DeniedFetch;

#[async_trait]
impl FetchOps for DeniedFetch {
    async fn fetch_url(&self, url: &str, _bypass_cache: bool) -> Result<FetchedContent> {
        Err(MlldError::UrlPolicyViolation {
            url: url.to_string(),
            reason: "no fetch capability configured".to_string(),
            ctx: ErrorContext::default(),
        })
    }
}

/// Module content returned by a resolver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedModule {
    pub content: String,
    pub headers: HashMap<String, String>,
}

/// One resolver in the manager's chain (registry modules, local prefixes,
/// GitHub, HTTP).
#[async_trait]
pub trait ResolverOps: Send + Sync {
    /// Whether this resolver handles the reference (e.g. `@user/module`).
    fn can_resolve(&self, reference: &str) -> bool;
    async fn resolve(
        &self,
        reference: &str,
        base_path: &str,
        payload: Option<&str>,
    ) -> Result<ResolvedModule>;
}

/// Decision returned by guard hooks. Plain values, never thrown signals.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
    Retry { reason: String },
    Transform { value: StructuredValue },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// External pre/post hooks around executable invocations, run after the
/// built-in guard registry.
#[async_trait]
pub trait HookOps: Send + Sync {
    async fn run_pre(&self, executable: &str, inputs: &[StructuredValue]) -> Decision;
    async fn run_post(
        &self,
        executable: &str,
        result: &StructuredValue,
        inputs: &[StructuredValue],
    ) -> Decision;
}

/// Default hook manager: allows everything.
pub struct NoopHooks;

#[async_trait]
impl HookOps for NoopHooks {
    async fn run_pre(&self, _executable: &str, _inputs: &[StructuredValue]) -> Decision {
        Decision::Allow
    }

    async fn run_post(
        &self,
        _executable: &str,
        _result: &StructuredValue,
        _inputs: &[StructuredValue],
    ) -> Decision {
        Decision::Allow
    }
}
