//! Executable Invocation
//!
//! Resolves a callable, binds arguments into a child scope, runs guard
//! hooks, executes the body for its variant, and threads the result through
//! any attached pipeline. Post-guard `retry` re-executes the body within the
//! guard's try budget; `when`-body `retry`/`deny` travel out as outcomes for
//! the pipeline engine.

use indexmap::IndexMap;
use serde_json::Value;

use crate::ast::{ExecInvocationNode, Literal, ValueExpr};
use crate::env::Environment;
use crate::error::{ErrorContext, MlldError, Result};
use crate::services::Decision;
use crate::value::{
    ExecutableDefinition, ExecutableKind, SecurityDescriptor, StructuredValue, Variable,
    VariableValue,
};

use super::field_access::access_path;
use super::{data_value, expr, guard, import, pipeline, r#for, run, when, BoxFut, Outcome};

/// Invoke an exec node: arguments, accessors, and its with-clause pipeline.
pub fn invoke<'a>(
    node: &'a ExecInvocationNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<Outcome>> {
    Box::pin(async move {
        let outcome = invoke_core(node, env).await?;
        let value = match outcome {
            Outcome::Value(v) => v,
            other => return Ok(other),
        };

        let value = apply_accessors(node, value, env).await?;

        if let Some(with_clause) = &node.with_clause {
            if !with_clause.pipeline.is_empty() {
                let result = pipeline::run_pipeline(
                    value,
                    &with_clause.pipeline,
                    with_clause.format,
                    with_clause.stream,
                    env,
                    pipeline::RetrySource::Invocation(node),
                )
                .await?;
                return Ok(Outcome::Value(result));
            }
        }
        Ok(Outcome::Value(value))
    })
}

/// Invoke without the node's own with-clause; the pipeline engine uses this
/// as the synthetic source stage when retrying.
pub fn invoke_core<'a>(
    node: &'a ExecInvocationNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<Outcome>> {
    Box::pin(async move {
        let args = eval_args(&node.args, env).await?;
        invoke_named(&node.target, args, &[], env).await
    })
}

async fn apply_accessors(
    node: &ExecInvocationNode,
    value: StructuredValue,
    env: &mut Environment,
) -> Result<StructuredValue> {
    if node.accessors.is_empty() {
        return Ok(value);
    }
    let resolved = expr::resolve_accessors(&node.accessors, env).await?;
    let data = value.as_data();
    let result = access_path(&data, &resolved)?;
    let mut out = StructuredValue::wrap(result.unwrap_or(Value::Null));
    out.absorb_security(&value.security);
    Ok(out)
}

/// Evaluate call arguments in expression mode. A bare string argument whose
/// text names a parameter variable in scope resolves to that parameter.
pub async fn eval_args(
    args: &[ValueExpr],
    env: &mut Environment,
) -> Result<Vec<StructuredValue>> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if let ValueExpr::Literal(Literal::Text(text)) = arg {
            if let Some(param) = env.get_variable(text).filter(|v| v.flags.is_parameter) {
                out.push(param.as_structured());
                continue;
            }
        }
        out.push(expr::eval_expr(arg, env).await?);
    }
    Ok(out)
}

/// Resolve a dotted target to an executable definition. `a.b` prefers a
/// flattened binding named `a.b`, then falls back to the base executable
/// `a` (transformer variants dispatch inside the definition).
fn resolve_callable(
    target: &[String],
    env: &mut Environment,
) -> Result<(String, ExecutableDefinition)> {
    let flattened = target.join(".");
    for candidate in [flattened.as_str(), target[0].as_str()] {
        if let Some(variable) = env.get_variable(candidate) {
            if let VariableValue::Executable(def) = variable.value {
                let mut def = *def;
                def.security = def.security.merge(&variable.security);
                return Ok((candidate.to_string(), def));
            }
        }
    }
    Err(MlldError::UnknownCommand {
        name: flattened,
        ctx: ErrorContext::default(),
    })
}

/// Invoke a named executable with already-evaluated arguments.
pub fn invoke_named<'a>(
    target: &'a [String],
    args: Vec<StructuredValue>,
    extra_labels: &'a [String],
    env: &'a mut Environment,
) -> BoxFut<'a, Result<Outcome>> {
    Box::pin(async move {
        let (name, def) = resolve_callable(target, env)?;
        env.begin_resolving(&name)?;
        let result = invoke_def(&name, &def, args, extra_labels, env).await;
        env.end_resolving(&name);
        result
    })
}

/// The invocation state machine: bindParams → runPreGuards → executeBody →
/// buildStructuredResult → runPostGuards, with post-guard retry bounded by
/// the guard try budget.
async fn invoke_def(
    name: &str,
    def: &ExecutableDefinition,
    args: Vec<StructuredValue>,
    extra_labels: &[String],
    env: &mut Environment,
) -> Result<Outcome> {
    let mut labels: Vec<String> = def.security.labels.iter().cloned().collect();
    for arg in &args {
        for label in &arg.security.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
    }
    for label in extra_labels {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }

    env.push_scope();
    let result = invoke_def_scoped(name, def, &args, &labels, env).await;
    env.pop_scope();
    let outcome = result?;

    let value = match outcome {
        Outcome::Value(v) => v,
        other => return Ok(other),
    };

    // Result descriptor covers inputs and the definition
    let mut value = value;
    for arg in &args {
        value.absorb_security(&arg.security);
    }
    value.absorb_security(&def.security);

    // Definition-level with-clause pipeline
    if let Some(with_clause) = &def.with_clause {
        if !with_clause.pipeline.is_empty() {
            let piped = pipeline::run_pipeline(
                value,
                &with_clause.pipeline,
                with_clause.format,
                with_clause.stream,
                env,
                pipeline::RetrySource::None,
            )
            .await?;
            return Ok(Outcome::Value(piped));
        }
    }
    Ok(Outcome::Value(value))
}

async fn invoke_def_scoped(
    name: &str,
    def: &ExecutableDefinition,
    args: &[StructuredValue],
    labels: &[String],
    env: &mut Environment,
) -> Result<Outcome> {
    // Captured module bindings come first so parameters may shadow them
    if let Some(module_env) = &def.captured_module_env {
        let mut scope = crate::env::Scope::default();
        for (binding_name, variable) in module_env {
            scope.variables.insert(binding_name.clone(), variable.clone());
        }
        env.merge_child(scope);
    }

    bind_params(def, args, env)?;

    let budget = env.config.guard_try_max;
    let mut attempt: u32 = 1;
    loop {
        guard::bind_mx(env, Some(attempt), None, None)?;

        match guard::run_before_guards(env, name, labels, args, attempt).await? {
            Decision::Allow => {}
            Decision::Deny { reason } => return Ok(Outcome::Deny(Some(reason))),
            Decision::Retry { .. } => {
                attempt += 1;
                if attempt > budget {
                    return Err(MlldError::GuardRetryExhausted {
                        guard: name.to_string(),
                        budget,
                        ctx: ErrorContext::default(),
                    });
                }
                continue;
            }
            Decision::Transform { value } => {
                if let Some(first_param) = def.params.first() {
                    let mut scope = crate::env::Scope::default();
                    let mut variable = Variable::parameter(
                        first_param.clone(),
                        VariableValue::Structured(Box::new(value.clone())),
                    );
                    variable.security = value.security.clone();
                    scope.variables.insert(first_param.clone(), variable);
                    env.merge_child(scope);
                }
            }
        }

        let outcome = exec_body(def, args, env).await?;
        let result = match outcome {
            Outcome::Value(v) => v,
            other => return Ok(other),
        };

        match guard::run_after_guards(env, name, labels, &result, args, attempt).await? {
            Decision::Allow => return Ok(Outcome::Value(result)),
            Decision::Transform { value } => return Ok(Outcome::Value(value)),
            Decision::Deny { reason } => return Ok(Outcome::Deny(Some(reason))),
            Decision::Retry { .. } => {
                attempt += 1;
                if attempt > budget {
                    return Err(MlldError::GuardRetryExhausted {
                        guard: name.to_string(),
                        budget,
                        ctx: ErrorContext::default(),
                    });
                }
            }
        }
    }
}

fn bind_params(
    def: &ExecutableDefinition,
    args: &[StructuredValue],
    env: &mut Environment,
) -> Result<()> {
    for (idx, param) in def.params.iter().enumerate() {
        let (value, security) = match args.get(idx) {
            Some(arg) => (
                VariableValue::Structured(Box::new(arg.clone())),
                arg.security.clone(),
            ),
            None => (VariableValue::Primitive(Value::Null), SecurityDescriptor::clean()),
        };
        let mut variable = Variable::parameter(param.clone(), value);
        variable.security = security;
        env.set_parameter_variable(variable)?;
    }
    Ok(())
}

/// Parameter values as plain JSON for the adapter boundary.
fn param_map(def: &ExecutableDefinition, env: &mut Environment) -> IndexMap<String, Value> {
    def.params
        .iter()
        .filter_map(|p| env.get_variable(p).map(|v| (p.clone(), v.as_json())))
        .collect()
}

/// Shadow helpers for a code language: name → (params, source).
fn shadow_map(
    def: &ExecutableDefinition,
    language: crate::ast::CodeLanguage,
) -> IndexMap<String, (Vec<String>, String)> {
    use crate::ast::CodeLanguage;
    let source_map = match language {
        CodeLanguage::Js | CodeLanguage::Node => &def.shadow_envs.js,
        CodeLanguage::Python => &def.shadow_envs.python,
        _ => return IndexMap::new(),
    };
    source_map
        .iter()
        .filter_map(|(name, helper)| match &helper.kind {
            ExecutableKind::Code { source, .. } => {
                Some((name.clone(), (helper.params.clone(), source.clone())))
            }
            _ => None,
        })
        .collect()
}

/// Execute the body for its definition variant. Parameters are bound in the
/// current scope.
fn exec_body<'a>(
    def: &'a ExecutableDefinition,
    args: &'a [StructuredValue],
    env: &'a mut Environment,
) -> BoxFut<'a, Result<Outcome>> {
    Box::pin(async move {
        match &def.kind {
            ExecutableKind::Command { template } => {
                let params = param_map(def, env);
                let value = run::exec_command_template(template, env, params, None).await?;
                Ok(Outcome::Value(value))
            }
            ExecutableKind::Code { language, source } => {
                let code = crate::ast::CodeExpr {
                    language: *language,
                    source: source.clone(),
                };
                let params = if def.params.is_empty()
                    && matches!(
                        language,
                        crate::ast::CodeLanguage::Bash | crate::ast::CodeLanguage::Sh
                    ) {
                    env.text_variables()
                } else {
                    param_map(def, env)
                };
                let shadow = shadow_map(def, *language);
                let value = run::exec_code(&code, env, params, shadow, None).await?;
                Ok(Outcome::Value(value))
            }
            ExecutableKind::Template { template } => {
                let (text, security) =
                    expr::interpolate(&template.parts, env, super::InterpContext::Default).await?;
                Ok(Outcome::Value(StructuredValue::text(text).with_security(security)))
            }
            ExecutableKind::CommandRef { target, args: ref_args } => {
                let mut call_args = eval_args(ref_args, env).await?;
                // Unconsumed caller arguments pass through after the bound ones
                if call_args.is_empty() {
                    call_args = args.to_vec();
                }
                invoke_named(std::slice::from_ref(target), call_args, &[], env).await
            }
            ExecutableKind::Section { path, section, rename } => {
                let (path_text, path_sec) =
                    expr::interpolate(&path.parts, env, super::InterpContext::Default).await?;
                let (section_text, _) =
                    expr::interpolate(&section.parts, env, super::InterpContext::Default).await?;
                let resolved = env.resolve_path(&path_text)?;
                let content = env.read_path(&resolved).await?;
                let mut extracted = import::extract_section(
                    &content,
                    &section_text,
                    env.config.section_match_threshold,
                )
                .ok_or_else(|| MlldError::SectionNotFound {
                    section: section_text.clone(),
                    path: resolved.validated.clone(),
                    ctx: ErrorContext::default(),
                })?;
                if let Some(rename) = rename {
                    let (new_heading, _) =
                        expr::interpolate(&rename.parts, env, super::InterpContext::Default).await?;
                    extracted = import::rename_heading(&extracted, &new_heading);
                }
                let security = path_sec.with_source(resolved.validated);
                Ok(Outcome::Value(
                    StructuredValue::text(extracted).with_security(security),
                ))
            }
            ExecutableKind::Resolver { path, payload } => {
                let payload_text = match payload {
                    Some(payload_expr) => {
                        Some(expr::eval_expr(payload_expr, env).await?.as_text().to_string())
                    }
                    None => None,
                };
                let module = env
                    .caps
                    .resolvers
                    .clone()
                    .resolve(path, &env.base_path, payload_text.as_deref())
                    .await?;
                Ok(Outcome::Value(StructuredValue::text(module.content)))
            }
            ExecutableKind::Pipeline { stages, format } => {
                let input = args
                    .first()
                    .cloned()
                    .unwrap_or_else(|| StructuredValue::text(""));
                let value = pipeline::run_pipeline(
                    input,
                    stages,
                    *format,
                    false,
                    env,
                    pipeline::RetrySource::None,
                )
                .await?;
                Ok(Outcome::Value(value))
            }
            ExecutableKind::Data { template } => {
                let value = data_value::eval_data_value(template, env).await?;
                Ok(Outcome::Value(value))
            }
            ExecutableKind::When { expr: when_expr } => when::eval_when_value(when_expr, env).await,
            ExecutableKind::For { expr: for_expr } => {
                let value = r#for::eval_for_value(for_expr, env).await?;
                Ok(Outcome::Value(value))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        Span, TemplateKind, TemplateNode, TemplatePart, VarRefNode,
    };
    use crate::env::{Capabilities, EvalConfig};
    use crate::value::{SourceDirective, VariableSource};
    use serde_json::json;

    fn env() -> Environment {
        Environment::new(Capabilities::default(), EvalConfig::default(), "/proj")
    }

    fn template_exe(name: &str, params: &[&str], parts: Vec<TemplatePart>) -> Variable {
        let def = ExecutableDefinition::new(
            ExecutableKind::Template {
                template: TemplateNode { kind: TemplateKind::Backtick, parts },
            },
            params.iter().map(|s| s.to_string()).collect(),
            SourceDirective::Exe,
        );
        Variable::new(
            name,
            VariableValue::Executable(Box::new(def)),
            VariableSource::directive("exe", "template"),
        )
    }

    fn combine_exe() -> Variable {
        template_exe(
            "combine",
            &["a", "b"],
            vec![
                TemplatePart::Var(VarRefNode::bare("a")),
                TemplatePart::Text("-".into()),
                TemplatePart::Var(VarRefNode::bare("b")),
            ],
        )
    }

    #[tokio::test]
    async fn test_template_invocation() {
        let mut e = env();
        e.set_variable(combine_exe()).unwrap();
        let outcome = invoke_named(
            &["combine".to_string()],
            vec![StructuredValue::text("red"), StructuredValue::text("small")],
            &[],
            &mut e,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value().unwrap().as_text(), "red-small");
    }

    #[tokio::test]
    async fn test_missing_args_bind_null() {
        let mut e = env();
        e.set_variable(combine_exe()).unwrap();
        let outcome = invoke_named(
            &["combine".to_string()],
            vec![StructuredValue::text("solo")],
            &[],
            &mut e,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value().unwrap().as_text(), "solo-");
    }

    #[tokio::test]
    async fn test_unknown_executable() {
        let mut e = env();
        let err = invoke_named(&["ghost".to_string()], vec![], &[], &mut e)
            .await
            .unwrap_err();
        assert!(matches!(err, MlldError::UnknownCommand { .. }));
    }

    #[tokio::test]
    async fn test_params_do_not_leak() {
        let mut e = env();
        e.set_variable(combine_exe()).unwrap();
        invoke_named(
            &["combine".to_string()],
            vec![StructuredValue::text("x"), StructuredValue::text("y")],
            &[],
            &mut e,
        )
        .await
        .unwrap();
        assert!(e.get_variable("a").is_none());
    }

    #[tokio::test]
    async fn test_result_absorbs_input_security() {
        let mut e = env();
        e.set_variable(combine_exe()).unwrap();
        let tainted = StructuredValue::text("t").with_security(SecurityDescriptor::tainted("net"));
        let outcome = invoke_named(
            &["combine".to_string()],
            vec![tainted, StructuredValue::text("y")],
            &[],
            &mut e,
        )
        .await
        .unwrap();
        let value = outcome.value().unwrap();
        assert_eq!(value.security.taint, crate::value::Taint::Tainted);
        assert!(value.security.sources.contains(&"net".to_string()));
    }

    #[tokio::test]
    async fn test_self_recursion_detected() {
        let mut e = env();
        let def = ExecutableDefinition::new(
            ExecutableKind::CommandRef {
                target: "loop".to_string(),
                args: vec![],
            },
            vec![],
            SourceDirective::Exe,
        );
        e.set_variable(Variable::new(
            "loop",
            VariableValue::Executable(Box::new(def)),
            VariableSource::directive("exe", "ref"),
        ))
        .unwrap();
        let err = invoke_named(&["loop".to_string()], vec![], &[], &mut e)
            .await
            .unwrap_err();
        assert!(matches!(err, MlldError::CircularExecutable { .. }));
    }

    #[tokio::test]
    async fn test_when_body_outcome_passthrough() {
        use crate::ast::{WhenAction, WhenClause, WhenCondition, WhenExprNode};
        let mut e = env();
        let def = ExecutableDefinition::new(
            ExecutableKind::When {
                expr: WhenExprNode {
                    clauses: vec![WhenClause {
                        condition: WhenCondition::Wildcard,
                        action: WhenAction::Retry(None),
                    }],
                    span: Span::default(),
                },
            },
            vec!["input".to_string()],
            SourceDirective::Exe,
        );
        e.set_variable(Variable::new(
            "validator",
            VariableValue::Executable(Box::new(def)),
            VariableSource::directive("exe", "when"),
        ))
        .unwrap();
        let outcome = invoke_named(
            &["validator".to_string()],
            vec![StructuredValue::wrap(json!("x"))],
            &[],
            &mut e,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, Outcome::Retry(_)));
    }
}
