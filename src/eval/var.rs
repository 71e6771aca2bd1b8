//! Var & Exe Directives
//!
//! `/var` evaluates its right-hand side into a typed variable, applies the
//! with-clause pipeline (with the RHS retained as the retryable source), and
//! runs label-matched after-guards around the whole evaluation, re-running
//! it on `retry` within the guard try budget. `/exe` stores an executable
//! definition, capturing same-language code executables as shadow helpers.

use crate::ast::{ExeBody, ExeDirective, Literal, ValueExpr, VarDirective};
use crate::env::Environment;
use crate::error::{ErrorContext, MlldError, Result};
use crate::services::Decision;
use crate::value::{
    ExecutableDefinition, ExecutableKind, SecurityDescriptor, SourceDirective, SourceFunction,
    StructuredValue, Variable, VariableSource, VariableValue,
};

use super::{expr, guard, pipeline, BoxFut};

/// Evaluate the RHS and its pipeline once (one guard attempt).
async fn eval_rhs_once(
    node: &VarDirective,
    env: &mut Environment,
    attempt: u32,
) -> Result<StructuredValue> {
    env.push_scope();
    let result = async {
        guard::bind_mx(env, Some(attempt), None, None)?;
        let mut value = expr::eval_expr(&node.value, env).await?;
        if let Some(with_clause) = &node.with_clause {
            if !with_clause.pipeline.is_empty() {
                value = pipeline::run_pipeline(
                    value,
                    &with_clause.pipeline,
                    with_clause.format,
                    with_clause.stream,
                    env,
                    pipeline::RetrySource::Expr(&node.value),
                )
                .await?;
            }
        }
        Ok(value)
    }
    .await;
    env.pop_scope();
    result
}

pub fn eval_var_directive<'a>(
    node: &'a VarDirective,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        if matches!(node.value, ValueExpr::Literal(Literal::Null))
            && node.labels.iter().any(|l| l == "required")
        {
            return Err(MlldError::MissingValue {
                name: node.name.clone(),
                ctx: ErrorContext::default(),
            });
        }

        // Executable-alias RHS stores a definition instead of a value
        if let ValueExpr::VarRef(var_ref) = &node.value {
            if var_ref.accessors.is_empty() {
                if let Some(aliased) = env.get_variable(&var_ref.name) {
                    if let VariableValue::Executable(def) = aliased.value {
                        let mut variable = Variable::new(
                            node.name.clone(),
                            VariableValue::Executable(def),
                            VariableSource::directive("var", "alias"),
                        );
                        variable.security = aliased.security;
                        return env.set_variable(variable);
                    }
                }
            }
        }

        let budget = env.config.guard_try_max;
        let mut attempt: u32 = 1;
        let value = loop {
            let value = eval_rhs_once(node, env, attempt).await?;
            match guard::run_after_guards(env, &node.name, &node.labels, &value, &[], attempt)
                .await?
            {
                Decision::Allow => break value,
                Decision::Transform { value } => break value,
                Decision::Deny { reason } => {
                    return Err(MlldError::GuardDenied {
                        reason,
                        guard: node.name.clone(),
                        ctx: ErrorContext::default(),
                    })
                }
                Decision::Retry { .. } => {
                    attempt += 1;
                    if attempt > budget {
                        return Err(MlldError::GuardRetryExhausted {
                            guard: node.name.clone(),
                            budget,
                            ctx: ErrorContext::default(),
                        });
                    }
                }
            }
        };

        let mut variable = build_variable(node, value);
        for label in &node.labels {
            variable.security = variable.security.clone().with_label(label.clone());
        }
        if node.labels.iter().any(|l| l == "retryable") {
            variable.flags.is_retryable = true;
        }
        variable.flags.source_function = Some(Box::new(SourceFunction {
            expr: node.value.clone(),
            with_clause: node.with_clause.clone(),
        }));
        env.set_variable(variable)
    })
}

/// Choose the variable variant for the RHS shape.
fn build_variable(node: &VarDirective, value: StructuredValue) -> Variable {
    let security = value.security.clone();
    let (variable_value, syntax) = match &node.value {
        ValueExpr::Literal(Literal::Text(_)) => (
            VariableValue::SimpleText(value.as_text().to_string()),
            "quoted",
        ),
        ValueExpr::Literal(_) => (VariableValue::Primitive(value.as_data()), "literal"),
        ValueExpr::Template(_) => (
            VariableValue::InterpolatedText(value.as_text().to_string()),
            "template",
        ),
        ValueExpr::Object(_) => (VariableValue::Object(value.as_data()), "literal"),
        ValueExpr::Array(_) => (VariableValue::Array(value.as_data()), "literal"),
        ValueExpr::Command(_) | ValueExpr::Code(_) => {
            if value.kind == crate::value::StructuredKind::Text {
                (
                    VariableValue::CommandResult {
                        stdout: value.as_text().to_string(),
                        stderr: String::new(),
                        exit_code: 0,
                    },
                    "command",
                )
            } else {
                (VariableValue::Structured(Box::new(value.clone())), "command")
            }
        }
        _ => (VariableValue::Structured(Box::new(value.clone())), "expression"),
    };
    let mut source = VariableSource::directive("var", syntax);
    source.interpolated = matches!(node.value, ValueExpr::Template(_));
    Variable::new(node.name.clone(), variable_value, source).with_security(security)
}

/// `/exe` — store an executable definition.
pub fn eval_exe_directive<'a>(
    node: &'a ExeDirective,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        let kind = match &node.body {
            ExeBody::Command(template) => ExecutableKind::Command {
                template: template.clone(),
            },
            ExeBody::Code(code) => ExecutableKind::Code {
                language: code.language,
                source: code.source.clone(),
            },
            ExeBody::Template(template) => ExecutableKind::Template {
                template: template.clone(),
            },
            ExeBody::CommandRef { target, args } => ExecutableKind::CommandRef {
                target: target.clone(),
                args: args.clone(),
            },
            ExeBody::Section { path, section, rename } => ExecutableKind::Section {
                path: path.clone(),
                section: section.clone(),
                rename: rename.clone(),
            },
            ExeBody::Resolver { path, payload } => ExecutableKind::Resolver {
                path: path.clone(),
                payload: payload.as_deref().cloned(),
            },
            ExeBody::Pipeline { stages, format } => ExecutableKind::Pipeline {
                stages: stages.clone(),
                format: *format,
            },
            ExeBody::Data(template) => ExecutableKind::Data {
                template: (**template).clone(),
            },
            ExeBody::When(when_expr) => ExecutableKind::When {
                expr: when_expr.clone(),
            },
            ExeBody::For(for_expr) => ExecutableKind::For {
                expr: (**for_expr).clone(),
            },
        };

        let mut def = ExecutableDefinition::new(kind, node.params.clone(), SourceDirective::Exe)
            .with_clause(node.with_clause.clone());

        // Same-language code executables already in scope become shadow
        // helpers for this body
        let code_language = match &def.kind {
            ExecutableKind::Code { language, .. } => Some(*language),
            _ => None,
        };
        if let Some(language) = code_language {
            use crate::ast::CodeLanguage;
            let shadow = env.visible_executables();
            match language {
                CodeLanguage::Js | CodeLanguage::Node => {
                    for (name, helper) in shadow {
                        if matches!(
                            helper.kind,
                            ExecutableKind::Code {
                                language: CodeLanguage::Js | CodeLanguage::Node,
                                ..
                            }
                        ) {
                            def.shadow_envs.js.insert(name, helper);
                        }
                    }
                }
                CodeLanguage::Python => {
                    for (name, helper) in shadow {
                        if matches!(
                            helper.kind,
                            ExecutableKind::Code {
                                language: CodeLanguage::Python,
                                ..
                            }
                        ) {
                            def.shadow_envs.python.insert(name, helper);
                        }
                    }
                }
                _ => {}
            }
        }

        def.security = SecurityDescriptor::clean();
        let variable = Variable::new(
            node.name.clone(),
            VariableValue::Executable(Box::new(def)),
            VariableSource::directive("exe", kind_syntax(&node.body)),
        );
        env.set_variable(variable)
    })
}

fn kind_syntax(body: &ExeBody) -> &'static str {
    match body {
        ExeBody::Command(_) => "command",
        ExeBody::Code(_) => "code",
        ExeBody::Template(_) => "template",
        ExeBody::CommandRef { .. } => "ref",
        ExeBody::Section { .. } => "section",
        ExeBody::Resolver { .. } => "resolver",
        ExeBody::Pipeline { .. } => "pipeline",
        ExeBody::Data(_) => "data",
        ExeBody::When(_) => "when",
        ExeBody::For(_) => "for",
    }
}
