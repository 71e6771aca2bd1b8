//! Resolver Manager
//!
//! Chains module resolvers. The evaluator asks the manager to resolve
//! references like `@user/module` or prefix-mapped local paths; the first
//! resolver claiming a reference wins.

use std::sync::Arc;

use crate::error::{ErrorContext, MlldError, Result};

use super::types::{ResolvedModule, ResolverOps};

#[derive(Clone, Default)]
pub struct ResolverManager {
    resolvers: Vec<Arc<dyn ResolverOps>>,
}

impl ResolverManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Arc<dyn ResolverOps>) {
        self.resolvers.push(resolver);
    }

    /// Whether any registered resolver claims the reference.
    pub fn can_resolve(&self, reference: &str) -> bool {
        self.resolvers.iter().any(|r| r.can_resolve(reference))
    }

    pub async fn resolve(
        &self,
        reference: &str,
        base_path: &str,
        payload: Option<&str>,
    ) -> Result<ResolvedModule> {
        for resolver in &self.resolvers {
            if resolver.can_resolve(reference) {
                return resolver.resolve(reference, base_path, payload).await;
            }
        }
        Err(MlldError::PathNotFound {
            path: reference.to_string(),
            ctx: ErrorContext::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed {
        prefix: &'static str,
        content: &'static str,
    }

    #[async_trait]
    impl ResolverOps for Fixed {
        fn can_resolve(&self, reference: &str) -> bool {
            reference.starts_with(self.prefix)
        }

        async fn resolve(
            &self,
            _reference: &str,
            _base_path: &str,
            _payload: Option<&str>,
        ) -> Result<ResolvedModule> {
            Ok(ResolvedModule {
                content: self.content.to_string(),
                headers: Default::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_first_claiming_resolver_wins() {
        let mut mgr = ResolverManager::new();
        mgr.register(Arc::new(Fixed { prefix: "@a/", content: "one" }));
        mgr.register(Arc::new(Fixed { prefix: "@", content: "two" }));
        let m = mgr.resolve("@a/mod", "/", None).await.unwrap();
        assert_eq!(m.content, "one");
        let m = mgr.resolve("@b/mod", "/", None).await.unwrap();
        assert_eq!(m.content, "two");
    }

    #[tokio::test]
    async fn test_unclaimed_reference_errors() {
        let mgr = ResolverManager::new();
        let err = mgr.resolve("@x/y", "/", None).await.unwrap_err();
        assert!(matches!(err, MlldError::PathNotFound { .. }));
    }
}
