//! Path Service
//!
//! Classifies inputs as file paths or URLs (protocol check) and resolves
//! relative paths against the current file's directory.

use crate::error::Result;

use super::fs::{join, normalize};
use super::types::{ContentType, ResolvedPath};

/// Protocols recognized as URLs.
const URL_SCHEMES: &[&str] = &["http://", "https://"];

pub fn is_url(input: &str) -> bool {
    URL_SCHEMES.iter().any(|s| input.starts_with(s))
}

/// Stateless path resolution against a base directory.
#[derive(Debug, Clone, Default)]
pub struct PathService;

impl PathService {
    pub fn resolve_path(&self, input: &str, base_dir: &str) -> Result<ResolvedPath> {
        if is_url(input) {
            return Ok(ResolvedPath {
                original: input.to_string(),
                validated: input.to_string(),
                content_type: ContentType::Url,
            });
        }
        let validated = if input.starts_with('/') {
            normalize(input)
        } else {
            join(base_dir, input)
        };
        Ok(ResolvedPath {
            original: input.to_string(),
            validated,
            content_type: ContentType::File,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_detection() {
        assert!(is_url("https://example.com/m.mld"));
        assert!(is_url("http://localhost:8000/m"));
        assert!(!is_url("./file.mld"));
        assert!(!is_url("ftp://host/file"));
    }

    #[test]
    fn test_relative_resolution() {
        let svc = PathService;
        let r = svc.resolve_path("./b.mld", "/proj").unwrap();
        assert_eq!(r.validated, "/proj/b.mld");
        assert_eq!(r.content_type, ContentType::File);
    }

    #[test]
    fn test_absolute_passthrough() {
        let svc = PathService;
        let r = svc.resolve_path("/x/../y.mld", "/proj").unwrap();
        assert_eq!(r.validated, "/y.mld");
    }

    #[test]
    fn test_url_passthrough() {
        let svc = PathService;
        let r = svc.resolve_path("https://h/m.mld", "/proj").unwrap();
        assert_eq!(r.content_type, ContentType::Url);
        assert_eq!(r.validated, "https://h/m.mld");
    }
}
