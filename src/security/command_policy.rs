//! Command Policy
//!
//! Allow/block/trusted pattern lists applied to shell commands before
//! execution, in addition to the operator classifier. A pattern matches the
//! command's first word exactly, or as a prefix when it ends with `*`.

use crate::error::{ErrorContext, MlldError, Result};

#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    /// Empty means any command (subject to the block list)
    pub allow: Vec<String>,
    pub block: Vec<String>,
    /// Trusted patterns skip the operator classifier
    pub trusted: Vec<String>,
}

fn pattern_matches(word: &str, pattern: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        word.starts_with(prefix)
    } else {
        word == pattern
    }
}

/// First word of a command string.
fn command_word(command: &str) -> &str {
    command.trim_start().split_whitespace().next().unwrap_or("")
}

impl CommandPolicy {
    pub fn check(&self, command: &str) -> Result<()> {
        let word = command_word(command);

        if self.block.iter().any(|p| pattern_matches(word, p)) {
            return Err(MlldError::CommandDenied {
                command: command.to_string(),
                ctx: ErrorContext::default(),
            });
        }

        if !self.allow.is_empty() && !self.allow.iter().any(|p| pattern_matches(word, p)) {
            return Err(MlldError::CommandDenied {
                command: command.to_string(),
                ctx: ErrorContext::default(),
            });
        }

        Ok(())
    }

    /// Trusted commands bypass the shell-operator classifier.
    pub fn is_trusted(&self, command: &str) -> bool {
        let word = command_word(command);
        self.trusted.iter().any(|p| pattern_matches(word, p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_everything() {
        let policy = CommandPolicy::default();
        assert!(policy.check("echo hi").is_ok());
    }

    #[test]
    fn test_block_list() {
        let policy = CommandPolicy {
            block: vec!["rm".into()],
            ..Default::default()
        };
        assert!(policy.check("rm -rf /tmp/x").is_err());
        assert!(policy.check("echo rm").is_ok());
    }

    #[test]
    fn test_allow_list_restricts() {
        let policy = CommandPolicy {
            allow: vec!["echo".into(), "git*".into()],
            ..Default::default()
        };
        assert!(policy.check("echo ok").is_ok());
        assert!(policy.check("github-cli op").is_ok());
        assert!(policy.check("curl http://x").is_err());
    }

    #[test]
    fn test_trusted_patterns() {
        let policy = CommandPolicy {
            trusted: vec!["jq".into()],
            ..Default::default()
        };
        assert!(policy.is_trusted("jq '. | length'"));
        assert!(!policy.is_trusted("awk '{print}'"));
    }
}
