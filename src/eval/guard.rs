//! Guard Evaluation
//!
//! Runs declared guards around executable invocations and labeled values.
//! A guard body is a `when` block evaluated with `@input`/`@output` and the
//! `@mx` magic object bound; its arms produce the closed `Decision` set.
//! Built-in guards run first, then the host's hook manager.

use serde_json::{json, Map, Value};

use crate::ast::{GuardTiming, WhenAction, WhenCondition, WhenExprNode};
use crate::env::Environment;
use crate::error::Result;
use crate::services::Decision;
use crate::value::{StructuredValue, Variable, VariableValue};

use super::{expr, when, BoxFut};

/// The current `@mx` object, or an empty one.
fn current_mx(env: &mut Environment) -> Map<String, Value> {
    env.get_variable("mx")
        .map(|v| v.as_json())
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

/// Bind `@mx` in the current scope, merging over any enclosing value.
pub fn bind_mx(
    env: &mut Environment,
    guard_try: Option<u32>,
    pipeline_try: Option<u32>,
    pipeline_retry: Option<&str>,
) -> Result<()> {
    let mut mx = current_mx(env);
    if let Some(t) = guard_try {
        mx.insert("guard".to_string(), json!({ "try": t }));
    }
    if pipeline_try.is_some() || pipeline_retry.is_some() {
        let mut pipeline = mx
            .get("pipeline")
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        if let Some(t) = pipeline_try {
            pipeline.insert("try".to_string(), json!(t));
        }
        if let Some(reason) = pipeline_retry {
            pipeline.insert("retry".to_string(), json!(reason));
        }
        mx.insert("pipeline".to_string(), Value::Object(pipeline));
    }
    let variable = Variable::parameter("mx", VariableValue::Object(Value::Object(mx)));
    // Rebinding in the same scope replaces the previous attempt's view
    let current = env.get_variable("mx");
    if current.map(|v| v.flags.is_parameter).unwrap_or(false) {
        // set_parameter_variable rejects same-scope rebinds; shadow in a
        // fresh scope is the caller's job, so overwrite through merge_child
        let mut scope = crate::env::Scope::default();
        scope.variables.insert("mx".to_string(), variable);
        env.merge_child(scope);
        return Ok(());
    }
    env.set_parameter_variable(variable)
}

/// Evaluate one guard body to a decision.
pub fn eval_guard_body<'a>(
    body: &'a WhenExprNode,
    env: &'a mut Environment,
    bindings: Vec<(String, Value)>,
) -> BoxFut<'a, Result<Decision>> {
    Box::pin(async move {
        env.push_scope();
        let result = eval_guard_body_inner(body, env, bindings).await;
        env.pop_scope();
        result
    })
}

async fn eval_guard_body_inner(
    body: &WhenExprNode,
    env: &mut Environment,
    bindings: Vec<(String, Value)>,
) -> Result<Decision> {
    for (name, value) in bindings {
        let variable = Variable::parameter(name, VariableValue::from_json(value));
        env.set_parameter_variable(variable)?;
    }

    for clause in &body.clauses {
        let matched = match &clause.condition {
            WhenCondition::Wildcard => true,
            WhenCondition::Expr(cond) => expr::eval_condition(cond, env).await?,
        };
        if !matched {
            continue;
        }
        return Ok(match &clause.action {
            WhenAction::Allow => Decision::Allow,
            WhenAction::Deny(reason) => Decision::Deny {
                reason: eval_reason(reason, env).await?,
            },
            WhenAction::Retry(reason) => Decision::Retry {
                reason: eval_reason(reason, env).await?,
            },
            WhenAction::Value(value_expr) => Decision::Transform {
                value: expr::eval_expr(value_expr, env).await?,
            },
            WhenAction::Show(value_expr) => {
                let value = expr::eval_expr(value_expr, env).await?;
                when::append_shown(env, value.as_text());
                Decision::Allow
            }
        });
    }
    Ok(Decision::Allow)
}

async fn eval_reason(
    reason: &Option<crate::ast::ValueExpr>,
    env: &mut Environment,
) -> Result<String> {
    match reason {
        Some(expr_node) => Ok(expr::eval_expr(expr_node, env).await?.as_text().to_string()),
        None => Ok(String::new()),
    }
}

fn inputs_value(inputs: &[StructuredValue]) -> Value {
    match inputs {
        [] => Value::Null,
        [single] => single.as_data(),
        many => Value::Array(many.iter().map(|v| v.as_data()).collect()),
    }
}

/// Run all matching before-guards. First non-allow decision wins.
pub fn run_before_guards<'a>(
    env: &'a mut Environment,
    executable: &'a str,
    labels: &'a [String],
    inputs: &'a [StructuredValue],
    attempt: u32,
) -> BoxFut<'a, Result<Decision>> {
    Box::pin(async move {
        let guards = env.guards_for(GuardTiming::Before, executable, labels);
        for guard in guards {
            let bindings = vec![
                ("input".to_string(), inputs_value(inputs)),
                ("mx".to_string(), mx_object(env, attempt)),
            ];
            let decision = eval_guard_body(&guard.body, env, bindings).await?;
            if !decision.is_allow() {
                return Ok(decision);
            }
        }
        let hook_decision = env.caps.hooks.clone().run_pre(executable, inputs).await;
        Ok(hook_decision)
    })
}

/// Run all matching after-guards against the produced output.
pub fn run_after_guards<'a>(
    env: &'a mut Environment,
    executable: &'a str,
    labels: &'a [String],
    output: &'a StructuredValue,
    inputs: &'a [StructuredValue],
    attempt: u32,
) -> BoxFut<'a, Result<Decision>> {
    Box::pin(async move {
        let guards = env.guards_for(GuardTiming::After, executable, labels);
        for guard in guards {
            let bindings = vec![
                ("output".to_string(), output.as_data()),
                ("input".to_string(), inputs_value(inputs)),
                ("mx".to_string(), mx_object(env, attempt)),
            ];
            let decision = eval_guard_body(&guard.body, env, bindings).await?;
            if !decision.is_allow() {
                return Ok(decision);
            }
        }
        let hook_decision = env.caps.hooks.clone().run_post(executable, output, inputs).await;
        Ok(hook_decision)
    })
}

fn mx_object(env: &mut Environment, attempt: u32) -> Value {
    let mut mx = current_mx(env);
    mx.insert("guard".to_string(), json!({ "try": attempt }));
    Value::Object(mx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        Accessor, BinaryExprNode, BinaryOp, Literal, Span, ValueExpr, VarRefNode, WhenClause,
    };
    use crate::env::{Capabilities, EvalConfig};

    fn env() -> Environment {
        Environment::new(Capabilities::default(), EvalConfig::default(), "/proj")
    }

    fn lit(s: &str) -> ValueExpr {
        ValueExpr::Literal(Literal::Text(s.into()))
    }

    fn mx_try_lt(n: i64) -> ValueExpr {
        ValueExpr::Binary(BinaryExprNode {
            op: BinaryOp::Lt,
            lhs: Box::new(ValueExpr::VarRef(VarRefNode {
                name: "mx".into(),
                accessors: vec![
                    Accessor::Field("guard".into()),
                    Accessor::Field("try".into()),
                ],
                span: Span::default(),
            })),
            rhs: Box::new(ValueExpr::Literal(Literal::Number(n.into()))),
        })
    }

    fn retry_guard_body() -> WhenExprNode {
        WhenExprNode {
            clauses: vec![
                WhenClause {
                    condition: WhenCondition::Expr(ValueExpr::Binary(BinaryExprNode {
                        op: BinaryOp::And,
                        lhs: Box::new(ValueExpr::Binary(BinaryExprNode {
                            op: BinaryOp::Ne,
                            lhs: Box::new(ValueExpr::VarRef(VarRefNode::bare("output"))),
                            rhs: Box::new(lit("ok")),
                        })),
                        rhs: Box::new(mx_try_lt(3)),
                    })),
                    action: WhenAction::Retry(Some(lit("need ok"))),
                },
                WhenClause {
                    condition: WhenCondition::Expr(ValueExpr::Binary(BinaryExprNode {
                        op: BinaryOp::Ne,
                        lhs: Box::new(ValueExpr::VarRef(VarRefNode::bare("output"))),
                        rhs: Box::new(lit("ok")),
                    })),
                    action: WhenAction::Deny(Some(lit("still invalid"))),
                },
                WhenClause {
                    condition: WhenCondition::Wildcard,
                    action: WhenAction::Allow,
                },
            ],
            span: Span::default(),
        }
    }

    #[tokio::test]
    async fn test_guard_retry_then_allow() {
        let mut e = env();
        let body = retry_guard_body();
        let d = eval_guard_body(
            &body,
            &mut e,
            vec![
                ("output".to_string(), json!("bad")),
                ("mx".to_string(), json!({"guard": {"try": 1}})),
            ],
        )
        .await
        .unwrap();
        assert_eq!(d, Decision::Retry { reason: "need ok".into() });

        let d = eval_guard_body(
            &body,
            &mut e,
            vec![
                ("output".to_string(), json!("ok")),
                ("mx".to_string(), json!({"guard": {"try": 2}})),
            ],
        )
        .await
        .unwrap();
        assert_eq!(d, Decision::Allow);
    }

    #[tokio::test]
    async fn test_guard_denies_after_budget() {
        let mut e = env();
        let body = retry_guard_body();
        let d = eval_guard_body(
            &body,
            &mut e,
            vec![
                ("output".to_string(), json!("bad")),
                ("mx".to_string(), json!({"guard": {"try": 3}})),
            ],
        )
        .await
        .unwrap();
        assert_eq!(d, Decision::Deny { reason: "still invalid".into() });
    }

    #[tokio::test]
    async fn test_guard_scope_popped() {
        let mut e = env();
        let body = retry_guard_body();
        let depth = e.depth();
        let _ = eval_guard_body(
            &body,
            &mut e,
            vec![("output".to_string(), json!("ok"))],
        )
        .await
        .unwrap();
        assert_eq!(e.depth(), depth);
        assert!(e.get_variable("output").is_none());
    }
}
