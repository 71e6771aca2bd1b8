//! When Evaluation
//!
//! Ordered condition matching. In value position the first matching arm's
//! value is produced; `show` arms append to the document; guard-decision
//! arms (`allow`/`deny`/`retry`) surface as outcomes for the pipeline and
//! guard machinery to inspect.

use crate::ast::{WhenAction, WhenCondition, WhenExprNode};
use crate::env::Environment;
use crate::error::{ErrorContext, MlldError, Result};
use crate::value::StructuredValue;

use super::{expr, BoxFut, Outcome};

/// Evaluate the optional reason expression on a `deny`/`retry` arm.
async fn eval_reason(
    reason: &Option<crate::ast::ValueExpr>,
    env: &mut Environment,
) -> Result<Option<String>> {
    match reason {
        Some(expr_node) => Ok(Some(expr::eval_expr(expr_node, env).await?.as_text().to_string())),
        None => Ok(None),
    }
}

/// Evaluate a `when` block in value position.
pub fn eval_when_value<'a>(
    node: &'a WhenExprNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<Outcome>> {
    Box::pin(async move {
        for clause in &node.clauses {
            let matched = match &clause.condition {
                WhenCondition::Wildcard => true,
                WhenCondition::Expr(cond) => expr::eval_condition(cond, env).await?,
            };
            if !matched {
                continue;
            }
            return Ok(match &clause.action {
                WhenAction::Value(value_expr) => {
                    Outcome::Value(expr::eval_expr(value_expr, env).await?)
                }
                WhenAction::Show(value_expr) => {
                    let value = expr::eval_expr(value_expr, env).await?;
                    append_shown(env, value.as_text());
                    Outcome::Value(value)
                }
                WhenAction::Allow => Outcome::Value(StructuredValue::text("")),
                WhenAction::Deny(reason) => Outcome::Deny(eval_reason(reason, env).await?),
                WhenAction::Retry(reason) => Outcome::Retry(eval_reason(reason, env).await?),
            });
        }
        Ok(Outcome::Value(StructuredValue::text("")))
    })
}

/// Evaluate a directive-level `/when`: the matching arm's value is shown.
pub fn eval_when_directive<'a>(
    node: &'a WhenExprNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        for clause in &node.clauses {
            let matched = match &clause.condition {
                WhenCondition::Wildcard => true,
                WhenCondition::Expr(cond) => expr::eval_condition(cond, env).await?,
            };
            if !matched {
                continue;
            }
            match &clause.action {
                WhenAction::Value(value_expr) | WhenAction::Show(value_expr) => {
                    let value = expr::eval_expr(value_expr, env).await?;
                    append_shown(env, value.as_text());
                }
                WhenAction::Allow => {}
                WhenAction::Deny(reason) => {
                    let reason = eval_reason(reason, env).await?;
                    return Err(MlldError::GuardDenied {
                        reason: reason.unwrap_or_else(|| "denied".to_string()),
                        guard: "when".to_string(),
                        ctx: ErrorContext::at(node.span),
                    });
                }
                WhenAction::Retry(_) => {
                    return Err(MlldError::InvalidStructuredValue {
                        message: "retry requested outside a pipeline or guard".to_string(),
                        ctx: ErrorContext::at(node.span),
                    });
                }
            }
            return Ok(());
        }
        Ok(())
    })
}

/// Shown values end in exactly one newline.
pub fn append_shown(env: &mut Environment, text: &str) {
    if text.ends_with('\n') {
        env.append_doc(text.to_string());
    } else {
        env.append_doc(format!("{}\n", text));
    }
}
