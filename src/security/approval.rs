//! Import Approval & Immutable Cache
//!
//! Before evaluating imported module content, the host may require approval
//! keyed by URL + content hash. Approved content is stored content-addressed
//! so identical bytes bypass both re-approval and re-fetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::error::{ErrorContext, MlldError, Result};

/// Hex SHA-256 of module content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Host-side approval decision for imported content.
pub trait ApprovalOps: Send + Sync {
    /// `hash` is the content hash; return false to reject the import.
    fn approve(&self, url: &str, hash: &str, content: &str) -> bool;
}

/// Default: approve everything (hosts install an interactive prompt).
pub struct AutoApprove;

impl ApprovalOps for AutoApprove {
    fn approve(&self, _url: &str, _hash: &str, _content: &str) -> bool {
        true
    }
}

/// Content-addressed store of verified module bodies.
#[derive(Clone, Default)]
pub struct ImmutableCache {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl ImmutableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &str) -> Option<String> {
        self.entries.lock().unwrap().get(hash).cloned()
    }

    pub fn put(&self, content: &str) -> String {
        let hash = content_hash(content);
        self.entries
            .lock()
            .unwrap()
            .insert(hash.clone(), content.to_string());
        hash
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.lock().unwrap().contains_key(hash)
    }
}

/// Runs the approval flow for fetched module content.
#[derive(Clone)]
pub struct ImportApproval {
    approver: Arc<dyn ApprovalOps>,
    cache: ImmutableCache,
}

impl Default for ImportApproval {
    fn default() -> Self {
        Self {
            approver: Arc::new(AutoApprove),
            cache: ImmutableCache::new(),
        }
    }
}

impl ImportApproval {
    pub fn new(approver: Arc<dyn ApprovalOps>, cache: ImmutableCache) -> Self {
        Self { approver, cache }
    }

    pub fn cache(&self) -> &ImmutableCache {
        &self.cache
    }

    /// Verify content for evaluation. Cached hashes skip re-approval.
    pub fn verify(&self, url: &str, content: &str) -> Result<()> {
        let hash = content_hash(content);
        if self.cache.contains(&hash) {
            return Ok(());
        }
        if !self.approver.approve(url, &hash, content) {
            return Err(MlldError::UrlPolicyViolation {
                url: url.to_string(),
                reason: format!("import rejected by approval hook (content {})", &hash[..12]),
                ctx: ErrorContext::default(),
            });
        }
        self.cache.put(content);
        Ok(())
    }
}
