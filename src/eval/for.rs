//! For/Iteration Evaluation
//!
//! `for @x in @xs => body` iterates arrays (or an object's values) with an
//! optional inline filter. In value position each element's result is
//! collected into an array; in directive position each element's rendering
//! is appended to the document.

use serde_json::Value;

use crate::ast::{ForBody, ForExprNode};
use crate::env::Environment;
use crate::error::{ErrorContext, MlldError, Result};
use crate::value::{SecurityDescriptor, StructuredValue, Variable, VariableValue};

use super::when::append_shown;
use super::{expr, BoxFut};

/// Elements an iterable provides.
async fn iterable_items(
    node: &ForExprNode,
    env: &mut Environment,
) -> Result<(Vec<Value>, SecurityDescriptor)> {
    let iterable = expr::eval_expr(&node.iterable, env).await?;
    let security = iterable.security.clone();
    let items = match iterable.as_data() {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        other => {
            return Err(MlldError::TypeMismatch {
                expected: "array or object to iterate".to_string(),
                actual: format!("{:?}", other),
                ctx: ErrorContext::default(),
            })
        }
    };
    Ok((items, security))
}

/// One element's body result, or None when filtered out. Runs inside a
/// child scope binding the loop variable; the scope is popped on all paths.
async fn eval_element(
    node: &ForExprNode,
    env: &mut Environment,
    item: Value,
    item_security: &SecurityDescriptor,
) -> Result<Option<StructuredValue>> {
    env.push_scope();
    let result = eval_element_inner(node, env, item, item_security).await;
    env.pop_scope();
    result
}

async fn eval_element_inner(
    node: &ForExprNode,
    env: &mut Environment,
    item: Value,
    item_security: &SecurityDescriptor,
) -> Result<Option<StructuredValue>> {
    let mut variable = Variable::parameter(node.binding.clone(), VariableValue::from_json(item));
    variable.security = item_security.clone();
    env.set_parameter_variable(variable)?;

    if let Some(filter) = &node.filter {
        if !expr::eval_condition(filter, env).await? {
            return Ok(None);
        }
    }
    let body_expr = match &node.body {
        ForBody::Value(e) | ForBody::Show(e) => e,
    };
    let value = expr::eval_expr(body_expr, env).await?;
    Ok(Some(value))
}

/// `for` in value position: collect an array.
pub fn eval_for_value<'a>(
    node: &'a ForExprNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<StructuredValue>> {
    Box::pin(async move {
        let (items, mut security) = iterable_items(node, env).await?;
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let item_security = security.clone();
            if let Some(value) = eval_element(node, env, item, &item_security).await? {
                security = security.merge(&value.security);
                results.push(value.as_data());
            }
        }
        Ok(StructuredValue::wrap(Value::Array(results)).with_security(security))
    })
}

/// `/for` directive: append each element's rendering.
pub fn eval_for_directive<'a>(
    node: &'a ForExprNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        let (items, security) = iterable_items(node, env).await?;
        for item in items {
            if let Some(value) = eval_element(node, env, item, &security).await? {
                let text = value.as_text().to_string();
                append_shown(env, &text);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BinaryExprNode, BinaryOp, Literal, Span, TemplateKind, TemplateNode, TemplatePart,
        ValueExpr, VarRefNode,
    };
    use crate::env::{Capabilities, EvalConfig};
    use crate::value::VariableSource;
    use serde_json::json;

    fn env() -> Environment {
        Environment::new(Capabilities::default(), EvalConfig::default(), "/proj")
    }

    fn array_var(name: &str, value: Value) -> Variable {
        Variable::new(
            name,
            VariableValue::Array(value),
            VariableSource::directive("var", "literal"),
        )
    }

    #[tokio::test]
    async fn test_collects_values() {
        let mut e = env();
        e.set_variable(array_var("xs", json!(["a", "b"]))).unwrap();
        let node = ForExprNode {
            binding: "x".into(),
            iterable: Box::new(ValueExpr::VarRef(VarRefNode::bare("xs"))),
            filter: None,
            body: ForBody::Value(Box::new(ValueExpr::Template(TemplateNode {
                kind: TemplateKind::Backtick,
                parts: vec![
                    TemplatePart::Var(VarRefNode::bare("x")),
                    TemplatePart::Text("!".into()),
                ],
            }))),
        };
        let v = eval_for_value(&node, &mut e).await.unwrap();
        assert_eq!(v.as_data(), json!(["a!", "b!"]));
    }

    #[tokio::test]
    async fn test_filter_skips_nulls() {
        let mut e = env();
        e.set_variable(array_var("xs", json!(["a", null, "b"]))).unwrap();
        let node = ForExprNode {
            binding: "x".into(),
            iterable: Box::new(ValueExpr::VarRef(VarRefNode::bare("xs"))),
            filter: Some(Box::new(ValueExpr::Binary(BinaryExprNode {
                op: BinaryOp::Ne,
                lhs: Box::new(ValueExpr::VarRef(VarRefNode::bare("x"))),
                rhs: Box::new(ValueExpr::Literal(Literal::Null)),
            }))),
            body: ForBody::Value(Box::new(ValueExpr::VarRef(VarRefNode::bare("x")))),
        };
        let v = eval_for_value(&node, &mut e).await.unwrap();
        assert_eq!(v.as_data(), json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_loop_var_scoped() {
        let mut e = env();
        e.set_variable(array_var("xs", json!([1]))).unwrap();
        let node = ForExprNode {
            binding: "x".into(),
            iterable: Box::new(ValueExpr::VarRef(VarRefNode::bare("xs"))),
            filter: None,
            body: ForBody::Value(Box::new(ValueExpr::VarRef(VarRefNode::bare("x")))),
        };
        eval_for_value(&node, &mut e).await.unwrap();
        assert!(e.get_variable("x").is_none());
    }

    #[tokio::test]
    async fn test_non_iterable_errors() {
        let mut e = env();
        let node = ForExprNode {
            binding: "x".into(),
            iterable: Box::new(ValueExpr::Literal(Literal::Number(5.into()))),
            filter: None,
            body: ForBody::Value(Box::new(ValueExpr::VarRef(VarRefNode {
                name: "x".into(),
                accessors: vec![],
                span: Span::default(),
            }))),
        };
        assert!(eval_for_value(&node, &mut e).await.is_err());
    }

    #[tokio::test]
    async fn test_directive_appends_lines() {
        let mut e = env();
        e.set_variable(array_var("xs", json!(["one", "two"]))).unwrap();
        let node = ForExprNode {
            binding: "x".into(),
            iterable: Box::new(ValueExpr::VarRef(VarRefNode::bare("xs"))),
            filter: None,
            body: ForBody::Show(Box::new(ValueExpr::VarRef(VarRefNode::bare("x")))),
        };
        eval_for_directive(&node, &mut e).await.unwrap();
        assert_eq!(e.render_output(), "one\ntwo\n");
    }
}
