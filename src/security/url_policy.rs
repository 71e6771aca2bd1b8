//! URL Policy
//!
//! Allow/block domain rules, protocol requirements, and response-size limits
//! applied to every import or fetch URL. Gist URLs are rewritten to their
//! raw form before matching.

use crate::error::{ErrorContext, MlldError, Result};

/// Parsed URL components
struct ParsedUrl {
    scheme: String,
    host: String,
}

/// Parse scheme and host out of a URL string. Returns None if invalid.
fn parse_url(url: &str) -> Option<ParsedUrl> {
    let scheme_end = url.find("://")?;
    let scheme = url[..scheme_end].to_string();
    let after_scheme = &url[scheme_end + 3..];
    let authority = after_scheme.split('/').next().unwrap_or("");
    if authority.is_empty() {
        return None;
    }
    // Strip port and userinfo
    let host = authority
        .rsplit('@')
        .next()
        .unwrap_or(authority)
        .split(':')
        .next()
        .unwrap_or("")
        .to_string();
    if host.is_empty() {
        return None;
    }
    Some(ParsedUrl { scheme, host })
}

/// A domain rule matches the host exactly or any subdomain of it.
fn domain_matches(host: &str, rule: &str) -> bool {
    host == rule || host.ends_with(&format!(".{}", rule))
}

/// Configurable URL security rules.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    /// Empty means any domain (subject to the block list)
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub require_https: bool,
    /// Maximum response body size in bytes
    pub max_response_size: usize,
    pub timeout_secs: u64,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            require_https: true,
            max_response_size: 5 * 1024 * 1024,
            timeout_secs: 30,
        }
    }
}

impl UrlPolicy {
    /// Validate a URL against the policy. Returns the (possibly rewritten)
    /// URL to actually fetch.
    pub fn check(&self, url: &str) -> Result<String> {
        let url = rewrite_gist_url(url);
        let parsed = parse_url(&url).ok_or_else(|| self.violation(&url, "malformed URL"))?;

        match parsed.scheme.as_str() {
            "https" => {}
            "http" if !self.require_https => {}
            "http" => return Err(self.violation(&url, "https required")),
            other => {
                return Err(self.violation(&url, &format!("unsupported protocol '{}'", other)))
            }
        }

        if self
            .blocked_domains
            .iter()
            .any(|d| domain_matches(&parsed.host, d))
        {
            return Err(self.violation(&url, "domain is blocked"));
        }

        if !self.allowed_domains.is_empty()
            && !self
                .allowed_domains
                .iter()
                .any(|d| domain_matches(&parsed.host, d))
        {
            return Err(self.violation(&url, "domain not in allow list"));
        }

        Ok(url)
    }

    /// Enforce the response-size cap after a fetch.
    pub fn check_response_size(&self, url: &str, size: usize) -> Result<()> {
        if size > self.max_response_size {
            return Err(self.violation(
                url,
                &format!(
                    "response size {} exceeds limit {}",
                    size, self.max_response_size
                ),
            ));
        }
        Ok(())
    }

    fn violation(&self, url: &str, reason: &str) -> MlldError {
        MlldError::UrlPolicyViolation {
            url: url.to_string(),
            reason: reason.to_string(),
            ctx: ErrorContext::default(),
        }
    }
}

/// Rewrite a gist.github.com page URL to its raw content form.
pub fn rewrite_gist_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://gist.github.com/") {
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() == 2 {
            return format!(
                "https://gist.githubusercontent.com/{}/{}/raw",
                segments[0], segments[1]
            );
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_required_by_default() {
        let policy = UrlPolicy::default();
        assert!(policy.check("https://example.com/m.mld").is_ok());
        assert!(policy.check("http://example.com/m.mld").is_err());
    }

    #[test]
    fn test_http_allowed_when_relaxed() {
        let policy = UrlPolicy {
            require_https: false,
            ..Default::default()
        };
        assert!(policy.check("http://localhost:9000/m.mld").is_ok());
    }

    #[test]
    fn test_blocked_domain_with_subdomains() {
        let policy = UrlPolicy {
            blocked_domains: vec!["evil.test".into()],
            ..Default::default()
        };
        assert!(policy.check("https://evil.test/x").is_err());
        assert!(policy.check("https://sub.evil.test/x").is_err());
        assert!(policy.check("https://notevil.test/x").is_ok());
    }

    #[test]
    fn test_allow_list_restricts() {
        let policy = UrlPolicy {
            allowed_domains: vec!["good.test".into()],
            ..Default::default()
        };
        assert!(policy.check("https://good.test/m").is_ok());
        assert!(policy.check("https://other.test/m").is_err());
    }

    #[test]
    fn test_gist_rewrite() {
        assert_eq!(
            rewrite_gist_url("https://gist.github.com/user/abc123"),
            "https://gist.githubusercontent.com/user/abc123/raw"
        );
        assert_eq!(
            rewrite_gist_url("https://example.com/user/abc123"),
            "https://example.com/user/abc123"
        );
    }

    #[test]
    fn test_response_size_cap() {
        let policy = UrlPolicy {
            max_response_size: 10,
            ..Default::default()
        };
        assert!(policy.check_response_size("https://x/y", 10).is_ok());
        assert!(policy.check_response_size("https://x/y", 11).is_err());
    }
}
