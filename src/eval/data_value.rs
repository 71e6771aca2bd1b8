//! Data Value Evaluation
//!
//! Recursive evaluation of object/array literals and `foreach` cross-product
//! application. Object keys keep their written order; element descriptors
//! merge into the container's descriptor.

use serde_json::{Map, Value};

use crate::ast::{ForeachNode, ValueExpr};
use crate::env::Environment;
use crate::error::{ErrorContext, MlldError, Result};
use crate::value::{SecurityDescriptor, StructuredValue};

use super::{expr, invocation, BoxFut, Outcome};

/// Evaluate an object or array literal.
pub fn eval_data_value<'a>(
    node: &'a ValueExpr,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<StructuredValue>> {
    Box::pin(async move {
        match node {
            ValueExpr::Object(entries) => {
                let mut map = Map::new();
                let mut security = SecurityDescriptor::clean();
                for (key, value_expr) in entries {
                    let value = expr::eval_expr(value_expr, env).await?;
                    security = security.merge(&value.security);
                    map.insert(key.clone(), value.as_data());
                }
                Ok(StructuredValue::wrap(Value::Object(map)).with_security(security))
            }
            ValueExpr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                let mut security = SecurityDescriptor::clean();
                for item in items {
                    let value = expr::eval_expr(item, env).await?;
                    security = security.merge(&value.security);
                    out.push(value.as_data());
                }
                Ok(StructuredValue::wrap(Value::Array(out)).with_security(security))
            }
            other => expr::eval_expr(other, env).await,
        }
    })
}

/// `foreach @fn(@xs, @ys)` — apply the executable across the cross product
/// of the argument arrays, left array outermost.
pub fn eval_foreach<'a>(
    node: &'a ForeachNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<StructuredValue>> {
    Box::pin(async move {
        let mut arrays: Vec<Vec<Value>> = Vec::with_capacity(node.arrays.len());
        let mut security = SecurityDescriptor::clean();
        for array_expr in &node.arrays {
            let value = expr::eval_expr(array_expr, env).await?;
            security = security.merge(&value.security);
            match value.as_data() {
                Value::Array(items) => arrays.push(items),
                other => {
                    return Err(MlldError::TypeMismatch {
                        expected: "array argument to foreach".to_string(),
                        actual: format!("{:?}", other),
                        ctx: ErrorContext::default(),
                    })
                }
            }
        }

        if arrays.is_empty() || arrays.iter().any(|a| a.is_empty()) {
            return Ok(StructuredValue::wrap(Value::Array(Vec::new())).with_security(security));
        }

        // Odometer over the cross product, leftmost slowest
        let mut results = Vec::new();
        let mut indices = vec![0usize; arrays.len()];
        'outer: loop {
            let args: Vec<StructuredValue> = indices
                .iter()
                .zip(&arrays)
                .map(|(&i, arr)| StructuredValue::wrap(arr[i].clone()))
                .collect();
            match invocation::invoke_named(&node.target, args, &[], env).await? {
                Outcome::Value(v) => {
                    security = security.merge(&v.security);
                    results.push(v.as_data());
                }
                Outcome::Deny(reason) => {
                    return Err(MlldError::GuardDenied {
                        reason: reason.unwrap_or_else(|| "denied".to_string()),
                        guard: node.target.join("."),
                        ctx: ErrorContext::default(),
                    })
                }
                Outcome::Retry(_) => {
                    return Err(MlldError::InvalidStructuredValue {
                        message: "retry requested outside a pipeline or guard".to_string(),
                        ctx: ErrorContext::default(),
                    })
                }
            }
            // Advance the odometer
            for pos in (0..indices.len()).rev() {
                indices[pos] += 1;
                if indices[pos] < arrays[pos].len() {
                    continue 'outer;
                }
                indices[pos] = 0;
                if pos == 0 {
                    break 'outer;
                }
            }
        }

        Ok(StructuredValue::wrap(Value::Array(results)).with_security(security))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::env::{Capabilities, EvalConfig};
    use serde_json::json;

    fn env() -> Environment {
        Environment::new(Capabilities::default(), EvalConfig::default(), "/proj")
    }

    #[tokio::test]
    async fn test_object_preserves_order() {
        let mut e = env();
        let node = ValueExpr::Object(vec![
            ("z".into(), ValueExpr::Literal(Literal::Number(1.into()))),
            ("a".into(), ValueExpr::Literal(Literal::Number(2.into()))),
        ]);
        let v = eval_data_value(&node, &mut e).await.unwrap();
        assert_eq!(v.as_text(), r#"{"z":1,"a":2}"#);
    }

    #[tokio::test]
    async fn test_nested_array() {
        let mut e = env();
        let node = ValueExpr::Array(vec![
            ValueExpr::Literal(Literal::Text("a".into())),
            ValueExpr::Array(vec![ValueExpr::Literal(Literal::Bool(true))]),
        ]);
        let v = eval_data_value(&node, &mut e).await.unwrap();
        assert_eq!(v.as_data(), json!(["a", [true]]));
    }

    #[tokio::test]
    async fn test_foreach_requires_arrays() {
        let mut e = env();
        let node = ForeachNode {
            target: vec!["f".into()],
            arrays: vec![ValueExpr::Literal(Literal::Text("not array".into()))],
        };
        assert!(eval_foreach(&node, &mut e).await.is_err());
    }
}
