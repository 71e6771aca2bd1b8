//! Command & Code Execution
//!
//! Bridges the evaluator to the execution adapters: interpolates command
//! templates with shell quoting, applies the classifier and command policy,
//! builds parameter maps, and shapes adapter results back into structured
//! values. Also hosts the `/run` directive evaluator and `<path>` content
//! loading.

use indexmap::IndexMap;
use serde_json::Value;

use crate::ast::{CodeExpr, CodeLanguage, CommandExpr, LoadContentNode, RunBody, RunDirective};
use crate::env::Environment;
use crate::error::{ErrorContext, MlldError, Result};
use crate::exec::{
    self, run_command, run_js, run_python, run_shell_code, CodeRequest, CommandRequest,
};
use crate::value::{SecurityDescriptor, StructuredValue, Taint};

use super::when::append_shown;
use super::{expr, import, BoxFut, InterpContext};

/// Command substitution semantics: one trailing newline is not part of the
/// value.
fn strip_trailing_newline(mut s: String) -> String {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
    s
}

/// Wrap adapter stdout: JSON-looking text re-parses into a structured
/// container, anything else stays text.
fn wrap_command_output(stdout: String, security: SecurityDescriptor) -> StructuredValue {
    let text = strip_trailing_newline(stdout);
    match StructuredValue::parse_and_wrap_json(&text) {
        Some(parsed) => parsed.with_security(security).with_provenance("command"),
        None => StructuredValue::text(text)
            .with_security(security)
            .with_provenance("command"),
    }
}

/// Execute an interpolated command template with named parameters.
pub async fn exec_command_template(
    template: &CommandExpr,
    env: &mut Environment,
    params: IndexMap<String, Value>,
    stdin: Option<String>,
) -> Result<StructuredValue> {
    let (command, security) =
        expr::interpolate(&template.parts, env, InterpContext::ShellCommand).await?;

    if !env.config.command_policy.is_trusted(&command) {
        exec::classify(&command)?;
    }
    env.config.command_policy.check(&command)?;

    let mut request = CommandRequest::new(command.clone());
    request.params = params;
    request.stdin = stdin;
    request.cwd = Some(env.base_path.clone());
    request.timeout_secs = env.config.command_timeout_secs;
    request.max_env_var_size = env.config.max_env_var_size;
    request.heredoc_fallback = env.config.heredoc_fallback;

    let output = run_command(request).await.map_err(|e| {
        e.with_context(|ctx| {
            ctx.directive = Some("run".to_string());
            ctx.working_dir = Some(env.base_path.clone());
        })
    })?;

    if output.exit_code != 0 {
        return Err(MlldError::CommandNonZeroExit {
            command,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            ctx: ErrorContext {
                working_dir: Some(env.base_path.clone()),
                ..Default::default()
            },
        });
    }

    if !output.stderr.is_empty() {
        env.append_effect(crate::env::Effect::Stderr(output.stderr.clone()));
    }

    let security = security.merge(&SecurityDescriptor {
        taint: Taint::Unknown,
        ..Default::default()
    });
    Ok(wrap_command_output(output.stdout, security))
}

/// Inline `[command]` expression with no bound parameters.
pub fn exec_command_expr<'a>(
    template: &'a CommandExpr,
    env: &'a mut Environment,
    stdin: Option<String>,
) -> BoxFut<'a, Result<StructuredValue>> {
    Box::pin(async move {
        exec_command_template(template, env, IndexMap::new(), stdin).await
    })
}

/// Execute an embedded code body with named parameters and shadow helpers.
pub async fn exec_code(
    code: &CodeExpr,
    env: &mut Environment,
    params: IndexMap<String, Value>,
    shadow: IndexMap<String, (Vec<String>, String)>,
    stdin: Option<String>,
) -> Result<StructuredValue> {
    let mut request = CodeRequest::new(code.source.clone());
    request.params = params;
    request.shadow = shadow;
    request.stdin = stdin;
    request.cwd = Some(env.base_path.clone());
    request.timeout_secs = env.config.command_timeout_secs;

    let language = code.language;
    let output = match language {
        CodeLanguage::Js | CodeLanguage::Node => run_js(request).await,
        CodeLanguage::Python => run_python(request).await,
        CodeLanguage::Bash => run_shell_code("bash", request).await,
        CodeLanguage::Sh => run_shell_code("sh", request).await,
    }
    .map_err(|e| {
        e.with_context(|ctx| {
            ctx.directive = Some("run".to_string());
            ctx.working_dir = Some(env.base_path.clone());
        })
    })?;

    for log in &output.logs {
        env.append_effect(crate::env::Effect::Stdout(log.clone()));
        env.caps.streaming.emit(log);
    }
    if !output.stderr.is_empty() {
        env.append_effect(crate::env::Effect::Stderr(output.stderr.clone()));
    }

    let security = SecurityDescriptor {
        taint: Taint::Unknown,
        ..Default::default()
    };

    let value = match language {
        CodeLanguage::Js | CodeLanguage::Node => output.result,
        // Shell-family results are their stdout text
        _ => Value::String(strip_trailing_newline(
            output.result.as_str().unwrap_or_default().to_string(),
        )),
    };
    Ok(StructuredValue::wrap(value)
        .with_security(security)
        .with_provenance(language.as_str()))
}

/// Inline `lang { code }` expression. Shell-family bodies with no declared
/// parameters see every simple-text variable as an env var.
pub fn exec_code_expr<'a>(
    code: &'a CodeExpr,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<StructuredValue>> {
    Box::pin(async move {
        let params = match code.language {
            CodeLanguage::Bash | CodeLanguage::Sh => env.text_variables(),
            _ => IndexMap::new(),
        };
        exec_code(code, env, params, IndexMap::new(), None).await
    })
}

/// `<path [# Section]>` content embedding.
pub fn load_content<'a>(
    node: &'a LoadContentNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<StructuredValue>> {
    Box::pin(async move {
        let (path_text, mut security) =
            expr::interpolate(&node.path.parts, env, InterpContext::Default).await?;
        let resolved = env.resolve_path(&path_text)?;
        let content = env.read_path(&resolved).await?;
        let content = match &node.section {
            Some(section) => import::extract_section(
                &content,
                section,
                env.config.section_match_threshold,
            )
            .ok_or_else(|| MlldError::SectionNotFound {
                section: section.clone(),
                path: resolved.validated.clone(),
                ctx: ErrorContext::default(),
            })?,
            None => content,
        };
        security = security.merge(
            &SecurityDescriptor {
                taint: Taint::Unknown,
                ..Default::default()
            }
            .with_source(resolved.validated.clone()),
        );
        Ok(StructuredValue::text(content).with_security(security))
    })
}

/// `/run` directive: execute and append stdout to the document.
pub fn eval_run_directive<'a>(
    node: &'a RunDirective,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        let continue_on_error = node.continue_on_error && !env.config.strict;
        let stdin = match node.with_clause.as_ref().and_then(|w| w.stdin.as_ref()) {
            Some(stdin_expr) => Some(expr::eval_expr(stdin_expr, env).await?.as_text().to_string()),
            None => None,
        };

        let result = match &node.body {
            RunBody::Command(cmd) => {
                exec_command_template(cmd, env, IndexMap::new(), stdin).await
            }
            RunBody::Code(code) => {
                let params = match code.language {
                    CodeLanguage::Bash | CodeLanguage::Sh => env.text_variables(),
                    _ => IndexMap::new(),
                };
                exec_code(code, env, params, IndexMap::new(), stdin).await
            }
        };

        let mut value = match result {
            Ok(value) => value,
            Err(err) if continue_on_error && err.is_recoverable() => {
                // Keep the partial stdout visible, record the failure
                let partial = match &err {
                    MlldError::CommandNonZeroExit { stdout, .. } => {
                        strip_trailing_newline(stdout.clone())
                    }
                    _ => String::new(),
                };
                env.collect_error(err);
                StructuredValue::text(partial)
            }
            Err(err) => return Err(err),
        };

        if let Some(with_clause) = &node.with_clause {
            if !with_clause.pipeline.is_empty() {
                value = super::pipeline::run_pipeline(
                    value,
                    &with_clause.pipeline,
                    with_clause.format,
                    with_clause.stream,
                    env,
                    super::pipeline::RetrySource::None,
                )
                .await?;
            }
        }

        let text = value.as_text().to_string();
        if !text.is_empty() {
            append_shown(env, &text);
        }
        Ok(())
    })
}
