//! Evaluator Configuration
//!
//! Budgets, thresholds, policies, and debug switches passed from the host.
//! Environment-variable overrides follow the names the host documents; the
//! struct itself carries no global state.

use crate::security::{CommandPolicy, UrlPolicy};

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Per-guard retry budget
    pub guard_try_max: u32,
    /// Per-pipeline retry budget
    pub pipeline_retry_max: u32,
    /// Byte threshold that triggers the bash heredoc fallback
    pub max_env_var_size: usize,
    pub heredoc_fallback: bool,
    pub command_timeout_secs: u64,
    /// Normalized-similarity threshold for import section matching
    pub section_match_threshold: f64,
    pub url_policy: UrlPolicy,
    pub command_policy: CommandPolicy,
    /// Fixed clock for deterministic runs
    pub mock_time: Option<String>,
    pub test_mode: bool,
    pub debug: bool,
    /// When set, `/run` continue-on-error is ignored and every non-zero
    /// exit is fatal
    pub strict: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            guard_try_max: 3,
            pipeline_retry_max: 3,
            max_env_var_size: 128 * 1024,
            heredoc_fallback: true,
            command_timeout_secs: 30,
            section_match_threshold: 0.8,
            url_policy: UrlPolicy::default(),
            command_policy: CommandPolicy::default(),
            mock_time: None,
            test_mode: false,
            debug: false,
            strict: false,
        }
    }
}

impl EvalConfig {
    /// Apply recognized process environment variables on top of defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(size) = std::env::var("MLLD_MAX_SHELL_ENV_VAR_SIZE") {
            if let Ok(size) = size.parse() {
                config.max_env_var_size = size;
            }
        }
        if std::env::var("MLLD_DISABLE_COMMAND_BASH_FALLBACK").is_ok() {
            config.heredoc_fallback = false;
        }
        if let Ok(mock) = std::env::var("MLLD_MOCK_TIME") {
            config.mock_time = Some(mock);
        }
        config.test_mode = std::env::var("MLLD_TEST_MODE").is_ok();
        config.debug = std::env::var("MLLD_DEBUG").is_ok();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EvalConfig::default();
        assert_eq!(c.guard_try_max, 3);
        assert_eq!(c.max_env_var_size, 131072);
        assert_eq!(c.command_timeout_secs, 30);
        assert!(c.heredoc_fallback);
        assert!(!c.strict);
    }
}
