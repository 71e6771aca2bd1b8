//! Interpreter
//!
//! Host-facing entry point. Ties the parser, environment, and evaluator
//! together: construct with capabilities and configuration, feed it a
//! source document, get the rendered output back.

use std::collections::HashMap;

use crate::env::{Capabilities, Environment, EvalConfig};
use crate::error::{MlldError, Result};
use crate::eval::evaluate_source;

/// Construction options for an interpreter instance.
pub struct InterpreterOptions {
    /// Project root; also the working directory for commands
    pub base_path: String,
    /// Raw stdin content for the INPUT reserved variable
    pub stdin: Option<String>,
    /// Host environment variables merged into INPUT
    pub env_vars: HashMap<String, String>,
    pub config: EvalConfig,
    pub caps: Capabilities,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            base_path: ".".to_string(),
            stdin: None,
            env_vars: HashMap::new(),
            config: EvalConfig::default(),
            caps: Capabilities::default(),
        }
    }
}

/// A configured evaluator over one environment.
pub struct Interpreter {
    env: Environment,
}

impl Interpreter {
    pub fn new(options: InterpreterOptions) -> Self {
        let mut env = Environment::new(options.caps, options.config, options.base_path);
        env.set_input(options.stdin, &options.env_vars);
        Self { env }
    }

    /// Evaluate a document and return its rendered output.
    pub async fn run(&mut self, source: &str) -> Result<String> {
        evaluate_source(source, &mut self.env).await
    }

    /// Recoverable errors buffered during evaluation.
    pub fn collected_errors(&self) -> &[MlldError] {
        &self.env.errors
    }

    /// Output rendered so far (useful after a fatal error).
    pub fn partial_output(&self) -> String {
        self.env.render_output()
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryFs;
    use std::sync::Arc;

    fn interpreter() -> Interpreter {
        Interpreter::new(InterpreterOptions::default())
    }

    fn interpreter_with_fs(files: &[(&str, &str)]) -> Interpreter {
        let fs = MemoryFs::new();
        for (path, content) in files {
            fs.add_file(*path, *content);
        }
        let mut options = InterpreterOptions::default();
        options.base_path = "/proj".to_string();
        options.caps.fs = Arc::new(fs);
        Interpreter::new(options)
    }

    #[tokio::test]
    async fn test_variable_and_show() {
        // E1
        let mut interp = interpreter();
        let out = interp
            .run("/var @x = \"Hello\"\n/show `@x, world`\n")
            .await
            .unwrap();
        assert_eq!(out, "Hello, world\n");
    }

    #[tokio::test]
    async fn test_literal_preservation() {
        let mut interp = interpreter();
        let source = "# Title\n\nplain prose with @ signs\nand /slashes in text\n";
        let out = interp.run(source).await.unwrap();
        assert_eq!(out, source);
    }

    #[tokio::test]
    async fn test_pipeline_retry_with_after_guard() {
        // E2, with the flaky stage as sh code against a state file (each
        // code invocation is its own process, so cross-call state lives on
        // disk)
        let marker = std::env::temp_dir().join(format!("mlld-flaky-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);
        let source = format!(
            "/guard after @pipelineRetry for retryable = when [\n  @output != \"ok\" && @mx.guard.try < 3 => retry \"need ok from pipeline\"\n  @output != \"ok\" => deny \"still invalid\"\n  * => allow\n]\n/exe @flakyStage(value) = sh {{ if [ -f {marker} ]; then printf ok; else touch {marker}; printf bad; fi }}\n/var retryable @pipelineValue = \"seed\" with {{ pipeline: [@flakyStage] }}\n/show `pipeline value: @pipelineValue`\n",
            marker = marker.display()
        );
        let mut interp = Interpreter::new(InterpreterOptions {
            base_path: std::env::temp_dir().display().to_string(),
            ..Default::default()
        });
        let out = interp.run(&source).await.unwrap();
        let _ = std::fs::remove_file(&marker);
        assert_eq!(out, "pipeline value: ok\n");
    }

    #[tokio::test]
    async fn test_cross_product_with_exe() {
        // E3
        let mut interp = interpreter();
        let source = "/exe @combine(a, b) = `@a-@b`\n/exe @cross(l1, l2) = for @x in @l1 => for @y in @l2 => @combine(@x, @y)\n/var @colors = [\"red\", \"blue\"]\n/var @sizes = [\"small\", \"large\"]\n/show @cross(@colors, @sizes)\n";
        let out = interp.run(source).await.unwrap();
        assert_eq!(
            out,
            "[[\"red-small\",\"red-large\"],[\"blue-small\",\"blue-large\"]]\n"
        );
    }

    #[tokio::test]
    async fn test_import_cycle() {
        // E4
        let mut interp = interpreter_with_fs(&[
            ("/proj/a.mld", "/import * from \"./b.mld\"\n"),
            ("/proj/b.mld", "/import * from \"./a.mld\"\n"),
        ]);
        let err = interp
            .run("/import * from \"./a.mld\"\n")
            .await
            .unwrap_err();
        match err {
            MlldError::CircularImport { chain, .. } => {
                assert!(chain.contains("/proj/b.mld"));
                assert!(chain.contains("/proj/a.mld"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forbidden_operator() {
        // E5
        let mut interp = interpreter();
        let err = interp.run("/run [echo hi && rm -rf /]\n").await.unwrap_err();
        match err {
            MlldError::ForbiddenShellOperator { operator, .. } => assert_eq!(operator, "&&"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_builtin_method_chain() {
        // E6
        let mut interp = interpreter();
        let source = "/var @s = \"HELLO, WORLD\"\n/show @s.split(\", \")[1].toLowerCase()\n";
        let out = interp.run(source).await.unwrap();
        assert_eq!(out, "world\n");
    }

    #[tokio::test]
    async fn test_import_bindings_and_conflict() {
        let mut interp = interpreter_with_fs(&[(
            "/proj/lib.mld",
            "/var @greeting = 'hi'\n/exe @shout(x) = `@x!`\n",
        )]);
        let out = interp
            .run("/import * from \"./lib.mld\"\n/show @shout(@greeting)\n")
            .await
            .unwrap();
        assert_eq!(out, "hi!\n");

        // Importing the same names again collides
        let err = interp
            .run("/import { greeting } from \"./lib.mld\"\n")
            .await
            .unwrap_err();
        assert!(matches!(err, MlldError::ImportConflict { .. }));
    }

    #[tokio::test]
    async fn test_import_section_extraction() {
        let mut interp = interpreter_with_fs(&[(
            "/proj/doc.md",
            "# Intro\n\nprose\n\n## Vars\n\n/var @fromDoc = 'sectioned'\n",
        )]);
        let out = interp
            .run("/import { fromDoc } from \"./doc.md#Vars\"\n/show @fromDoc\n")
            .await
            .unwrap();
        assert_eq!(out, "sectioned\n");
    }

    #[tokio::test]
    async fn test_when_directive_first_match() {
        let mut interp = interpreter();
        let source = "/var @mode = 'fast'\n/when [\n  @mode == 'slow' => show 'taking it easy'\n  @mode == 'fast' => show 'rushing'\n  * => show 'unknown'\n]\n";
        let out = interp.run(source).await.unwrap();
        assert_eq!(out, "rushing\n");
    }

    #[tokio::test]
    async fn test_for_directive_with_filter() {
        let mut interp = interpreter();
        let source =
            "/var @xs = [\"a\", null, \"b\"]\n/for @x in @xs when @x != null => show `item: @x`\n";
        let out = interp.run(source).await.unwrap();
        assert_eq!(out, "item: a\nitem: b\n");
    }

    #[tokio::test]
    async fn test_foreach_cross_product() {
        let mut interp = interpreter();
        let source = "/exe @pair(a, b) = `@a/@b`\n/var @l = [1, 2]\n/var @r = [\"x\"]\n/show foreach @pair(@l, @r)\n";
        let out = interp.run(source).await.unwrap();
        assert_eq!(out, "[\"1/x\",\"2/x\"]\n");
    }

    #[tokio::test]
    async fn test_frontmatter_reserved_variable() {
        let mut interp = interpreter();
        let source = "---\ntitle: My Doc\n---\n/show @fm.title\n";
        let out = interp.run(source).await.unwrap();
        assert_eq!(out, "My Doc\n");
    }

    #[tokio::test]
    async fn test_mock_time_determinism() {
        let mut options = InterpreterOptions::default();
        options.config.mock_time = Some("2024-06-01T00:00:00Z".to_string());
        let mut interp = Interpreter::new(options);
        let out = interp.run("/show @TIME\n").await.unwrap();
        assert_eq!(out, "2024-06-01T00:00:00Z\n");
    }

    #[tokio::test]
    async fn test_input_from_stdin() {
        let mut options = InterpreterOptions::default();
        options.stdin = Some(r#"{"name": "stdin-user"}"#.to_string());
        let mut interp = Interpreter::new(options);
        let out = interp.run("/show @INPUT.name\n").await.unwrap();
        assert_eq!(out, "stdin-user\n");
    }

    #[tokio::test]
    async fn test_reserved_assignment_rejected() {
        let mut interp = interpreter();
        let err = interp.run("/var @INPUT = 'nope'\n").await.unwrap_err();
        assert!(matches!(err, MlldError::ReservedName { .. }));
    }

    #[tokio::test]
    async fn test_parallel_pipeline_stages() {
        let mut interp = interpreter();
        let source = "/exe @angle(v) = `<@v>`\n/exe @square(v) = `(@v)`\n/var @piped = \"mid\" with { pipeline: [[@angle, @square]] }\n/show @piped\n";
        let out = interp.run(source).await.unwrap();
        assert_eq!(out, "[\"<mid>\",\"(mid)\"]\n");
    }

    #[tokio::test]
    async fn test_exe_command_invocation() {
        let mut interp = interpreter();
        let source = "/exe @greet(name) = [printf 'hi %s' @name]\n/show @greet('crew')\n";
        let out = interp.run(source).await.unwrap();
        assert_eq!(out, "hi crew\n");
    }

    #[tokio::test]
    async fn test_guard_retry_budget_exhausted() {
        let mut interp = interpreter();
        let source = "/guard after @neverHappy for picky = when [\n  * => retry \"again\"\n]\n/var picky @value = \"anything\"\n";
        let err = interp.run(source).await.unwrap_err();
        assert!(matches!(err, MlldError::GuardRetryExhausted { budget: 3, .. }));
    }

    #[tokio::test]
    async fn test_guard_before_deny() {
        let mut interp = interpreter();
        let source = "/guard before @noSecrets for @leak = when [\n  @input == \"secret\" => deny \"blocked\"\n  * => allow\n]\n/exe @leak(v) = `leaked: @v`\n/show @leak('secret')\n";
        let err = interp.run(source).await.unwrap_err();
        assert!(matches!(err, MlldError::GuardDenied { .. }));
    }
}
