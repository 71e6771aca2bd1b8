//! Expression Evaluation & Interpolation
//!
//! Evaluates AST value nodes into structured values, carrying security
//! descriptors, and renders templates with context-sensitive escaping
//! (default, shell-command quoting, markdown).

use serde_json::{json, Value};

use crate::ast::{
    Accessor, BinaryExprNode, BinaryOp, Literal, TemplatePart, ValueExpr, VarRefNode,
};
use crate::env::Environment;
use crate::error::{ErrorContext, MlldError, Result};
use crate::value::{
    value_truthy, SecurityDescriptor, StructuredValue, VariableValue,
};

use super::field_access::{access_path, ResolvedAccessor};
use super::{data_value, invocation, r#for, run, when, BoxFut, Outcome};

/// Escaping context for interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpContext {
    Default,
    ShellCommand,
    Markdown,
}

/// Quote a value for safe splicing into a shell command.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r#"'"'"'"#))
    }
}

/// Evaluate an expression to a structured value.
pub fn eval_expr<'a>(
    expr: &'a ValueExpr,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<StructuredValue>> {
    Box::pin(async move {
        match expr {
            ValueExpr::Literal(lit) => Ok(eval_literal(lit)),
            ValueExpr::Template(template) => {
                let (text, security) = interpolate(&template.parts, env, InterpContext::Default).await?;
                Ok(StructuredValue::text(text).with_security(security))
            }
            ValueExpr::Object(_) | ValueExpr::Array(_) => data_value::eval_data_value(expr, env).await,
            ValueExpr::VarRef(var_ref) => resolve_var_ref(var_ref, env).await,
            ValueExpr::ExecInvocation(node) => {
                match invocation::invoke(node, env).await? {
                    Outcome::Value(v) => Ok(v),
                    Outcome::Deny(reason) => Err(MlldError::GuardDenied {
                        reason: reason.unwrap_or_else(|| "denied".to_string()),
                        guard: node.target.join("."),
                        ctx: ErrorContext::at(node.span),
                    }),
                    Outcome::Retry(_) => Err(MlldError::InvalidStructuredValue {
                        message: "retry requested outside a pipeline or guard".to_string(),
                        ctx: ErrorContext::at(node.span),
                    }),
                }
            }
            ValueExpr::Command(cmd) => run::exec_command_expr(cmd, env, None).await,
            ValueExpr::Code(code) => run::exec_code_expr(code, env).await,
            ValueExpr::LoadContent(load) => run::load_content(load, env).await,
            ValueExpr::When(when_expr) => {
                match when::eval_when_value(when_expr, env).await? {
                    Outcome::Value(v) => Ok(v),
                    Outcome::Deny(reason) => Err(MlldError::GuardDenied {
                        reason: reason.unwrap_or_else(|| "denied".to_string()),
                        guard: "when".to_string(),
                        ctx: ErrorContext::at(when_expr.span),
                    }),
                    Outcome::Retry(_) => Err(MlldError::InvalidStructuredValue {
                        message: "retry requested outside a pipeline or guard".to_string(),
                        ctx: ErrorContext::at(when_expr.span),
                    }),
                }
            }
            ValueExpr::For(for_expr) => r#for::eval_for_value(for_expr, env).await,
            ValueExpr::Foreach(node) => data_value::eval_foreach(node, env).await,
            ValueExpr::Not(inner) => {
                let value = eval_expr(inner, env).await?;
                let result = !value.is_truthy();
                Ok(StructuredValue::wrap(json!(result)).with_security(value.security))
            }
            ValueExpr::Binary(node) => eval_binary(node, env).await,
        }
    })
}

fn eval_literal(lit: &Literal) -> StructuredValue {
    match lit {
        Literal::Text(s) => StructuredValue::text(s.clone()),
        Literal::Number(n) => StructuredValue::wrap(Value::Number(n.clone())),
        Literal::Bool(b) => StructuredValue::wrap(json!(b)),
        Literal::Null => StructuredValue::wrap(Value::Null),
    }
}

/// Resolve a variable reference, walking its accessor chain.
pub fn resolve_var_ref<'a>(
    node: &'a VarRefNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<StructuredValue>> {
    Box::pin(async move {
        let variable = env.get_variable(&node.name).ok_or_else(|| {
            MlldError::UnknownVariable {
                name: node.name.clone(),
                ctx: ErrorContext::at(node.span),
            }
        })?;

        // Stored templates interpolate on access
        let base = if let VariableValue::Template(template) = &variable.value {
            let (text, mut security) =
                interpolate(&template.parts, env, InterpContext::Default).await?;
            security = security.merge(&variable.security);
            StructuredValue::text(text).with_security(security)
        } else {
            variable.as_structured()
        };

        if node.accessors.is_empty() {
            return Ok(base);
        }

        let resolved = resolve_accessors(&node.accessors, env).await?;
        let data = base.as_data();
        let result = access_path(&data, &resolved)?;
        let mut out = StructuredValue::wrap(result.unwrap_or(Value::Null));
        out.absorb_security(&base.security);
        Ok(out)
    })
}

/// Evaluate the dynamic parts of an accessor chain.
pub fn resolve_accessors<'a>(
    accessors: &'a [Accessor],
    env: &'a mut Environment,
) -> BoxFut<'a, Result<Vec<ResolvedAccessor>>> {
    Box::pin(async move {
        let mut out = Vec::with_capacity(accessors.len());
        for accessor in accessors {
            out.push(match accessor {
                Accessor::Field(name) => ResolvedAccessor::Field(name.clone()),
                Accessor::Index(idx) => ResolvedAccessor::Index(*idx),
                Accessor::Expr(expr) => {
                    let value = eval_expr(expr, env).await?;
                    ResolvedAccessor::Key(value.as_data())
                }
                Accessor::Call { name, args } => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(eval_expr(arg, env).await?.as_data());
                    }
                    ResolvedAccessor::Call {
                        name: name.clone(),
                        args: values,
                    }
                }
            });
        }
        Ok(out)
    })
}

/// Render template parts to text, merging referenced values' descriptors.
pub fn interpolate<'a>(
    parts: &'a [TemplatePart],
    env: &'a mut Environment,
    ctx: InterpContext,
) -> BoxFut<'a, Result<(String, SecurityDescriptor)>> {
    Box::pin(async move {
        let mut out = String::new();
        let mut security = SecurityDescriptor::clean();
        for part in parts {
            match part {
                TemplatePart::Text(text) => out.push_str(text),
                TemplatePart::Var(var_ref) => {
                    let value = resolve_var_ref(var_ref, env).await?;
                    push_interpolated(&mut out, value.as_text(), ctx);
                    security = security.merge(&value.security);
                }
                TemplatePart::Exec(node) => {
                    let value = eval_expr(&ValueExpr::ExecInvocation(node.clone()), env).await?;
                    push_interpolated(&mut out, value.as_text(), ctx);
                    security = security.merge(&value.security);
                }
            }
        }
        Ok((out, security))
    })
}

fn push_interpolated(out: &mut String, text: &str, ctx: InterpContext) {
    match ctx {
        InterpContext::ShellCommand => out.push_str(&shell_quote(text)),
        InterpContext::Default | InterpContext::Markdown => out.push_str(text),
    }
}

async fn eval_binary(node: &BinaryExprNode, env: &mut Environment) -> Result<StructuredValue> {
    // Short-circuit forms first
    match node.op {
        BinaryOp::And => {
            let lhs = eval_expr(&node.lhs, env).await?;
            if !lhs.is_truthy() {
                return Ok(StructuredValue::wrap(json!(false)).with_security(lhs.security));
            }
            let rhs = eval_expr(&node.rhs, env).await?;
            let security = lhs.security.merge(&rhs.security);
            return Ok(StructuredValue::wrap(json!(rhs.is_truthy())).with_security(security));
        }
        BinaryOp::Or => {
            let lhs = eval_expr(&node.lhs, env).await?;
            if lhs.is_truthy() {
                return Ok(StructuredValue::wrap(json!(true)).with_security(lhs.security));
            }
            let rhs = eval_expr(&node.rhs, env).await?;
            let security = lhs.security.merge(&rhs.security);
            return Ok(StructuredValue::wrap(json!(rhs.is_truthy())).with_security(security));
        }
        _ => {}
    }

    let lhs = eval_expr(&node.lhs, env).await?;
    let rhs = eval_expr(&node.rhs, env).await?;
    let security = lhs.security.merge(&rhs.security);
    let (l, r) = (lhs.as_data(), rhs.as_data());

    let result = match node.op {
        BinaryOp::Eq => json!(loose_eq(&l, &r)),
        BinaryOp::Ne => json!(!loose_eq(&l, &r)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&l, &r)?;
            json!(match node.op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::Add => add_values(&l, &r),
        BinaryOp::And | BinaryOp::Or => unreachable!(),
    };
    Ok(StructuredValue::wrap(result).with_security(security))
}

/// Loose equality: numbers compare numerically, mixed scalar types compare
/// by text form, containers compare structurally.
fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().unwrap_or(f64::NAN) == b.as_f64().unwrap_or(f64::NAN)
        }
        (Value::Array(_), _) | (_, Value::Array(_)) | (Value::Object(_), _) | (_, Value::Object(_)) => {
            l == r
        }
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => crate::value::primitive_text(l) == crate::value::primitive_text(r),
    }
}

fn compare(l: &Value, r: &Value) -> Result<std::cmp::Ordering> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b).ok_or_else(|| MlldError::TypeMismatch {
                expected: "comparable numbers".to_string(),
                actual: "NaN".to_string(),
                ctx: ErrorContext::default(),
            })
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(MlldError::TypeMismatch {
            expected: "two numbers or two strings".to_string(),
            actual: format!("{} and {}", type_of(l), type_of(r)),
            ctx: ErrorContext::default(),
        }),
    }
}

fn add_values(l: &Value, r: &Value) -> Value {
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        let sum = a + b;
        if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
            json!(sum as i64)
        } else {
            json!(sum)
        }
    } else {
        json!(format!(
            "{}{}",
            crate::value::primitive_text(l),
            crate::value::primitive_text(r)
        ))
    }
}

fn type_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Condition helper shared by `when` and `for` filters.
pub async fn eval_condition(expr: &ValueExpr, env: &mut Environment) -> Result<bool> {
    let value = eval_expr(expr, env).await?;
    Ok(value_truthy(&value.as_data()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Span, TemplateKind, TemplateNode};
    use crate::env::{Capabilities, EvalConfig};
    use crate::value::{Variable, VariableSource};

    fn env() -> Environment {
        Environment::new(Capabilities::default(), EvalConfig::default(), "/proj")
    }

    fn text_var(name: &str, text: &str) -> Variable {
        Variable::new(
            name,
            VariableValue::SimpleText(text.into()),
            VariableSource::directive("var", "quoted"),
        )
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("simple-word.txt"), "simple-word.txt");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(shell_quote(""), "''");
    }

    #[tokio::test]
    async fn test_literal_eval() {
        let mut e = env();
        let v = eval_expr(&ValueExpr::Literal(Literal::Text("hi".into())), &mut e)
            .await
            .unwrap();
        assert_eq!(v.as_text(), "hi");
        let n = eval_expr(
            &ValueExpr::Literal(Literal::Number(serde_json::Number::from(3))),
            &mut e,
        )
        .await
        .unwrap();
        assert_eq!(n.as_data(), json!(3));
    }

    #[tokio::test]
    async fn test_template_interpolation() {
        let mut e = env();
        e.set_variable(text_var("x", "Hello")).unwrap();
        let template = TemplateNode {
            kind: TemplateKind::Backtick,
            parts: vec![
                TemplatePart::Var(VarRefNode::bare("x")),
                TemplatePart::Text(", world".into()),
            ],
        };
        let v = eval_expr(&ValueExpr::Template(template), &mut e).await.unwrap();
        assert_eq!(v.as_text(), "Hello, world");
    }

    #[tokio::test]
    async fn test_unknown_variable() {
        let mut e = env();
        let err = eval_expr(&ValueExpr::VarRef(VarRefNode::bare("ghost")), &mut e)
            .await
            .unwrap_err();
        assert!(matches!(err, MlldError::UnknownVariable { .. }));
    }

    #[tokio::test]
    async fn test_accessor_chain_with_builtins() {
        let mut e = env();
        e.set_variable(text_var("s", "HELLO, WORLD")).unwrap();
        let node = VarRefNode {
            name: "s".into(),
            accessors: vec![
                Accessor::Call {
                    name: "split".into(),
                    args: vec![ValueExpr::Literal(Literal::Text(", ".into()))],
                },
                Accessor::Index(1),
                Accessor::Call {
                    name: "toLowerCase".into(),
                    args: vec![],
                },
            ],
            span: Span::default(),
        };
        let v = eval_expr(&ValueExpr::VarRef(node), &mut e).await.unwrap();
        assert_eq!(v.as_text(), "world");
    }

    #[tokio::test]
    async fn test_binary_comparisons() {
        let mut e = env();
        let expr = ValueExpr::Binary(BinaryExprNode {
            op: BinaryOp::Ne,
            lhs: Box::new(ValueExpr::Literal(Literal::Text("bad".into()))),
            rhs: Box::new(ValueExpr::Literal(Literal::Text("ok".into()))),
        });
        assert!(eval_condition(&expr, &mut e).await.unwrap());

        let lt = ValueExpr::Binary(BinaryExprNode {
            op: BinaryOp::Lt,
            lhs: Box::new(ValueExpr::Literal(Literal::Number(serde_json::Number::from(1)))),
            rhs: Box::new(ValueExpr::Literal(Literal::Number(serde_json::Number::from(3)))),
        });
        assert!(eval_condition(&lt, &mut e).await.unwrap());
    }

    #[tokio::test]
    async fn test_and_short_circuits() {
        let mut e = env();
        // rhs references an unknown variable; it must not be evaluated
        let expr = ValueExpr::Binary(BinaryExprNode {
            op: BinaryOp::And,
            lhs: Box::new(ValueExpr::Literal(Literal::Bool(false))),
            rhs: Box::new(ValueExpr::VarRef(VarRefNode::bare("ghost"))),
        });
        assert!(!eval_condition(&expr, &mut e).await.unwrap());
    }

    #[tokio::test]
    async fn test_security_merges_through_binary() {
        let mut e = env();
        let mut tainted = text_var("t", "x");
        tainted.security = SecurityDescriptor::tainted("net");
        e.set_variable(tainted).unwrap();
        let expr = ValueExpr::Binary(BinaryExprNode {
            op: BinaryOp::Add,
            lhs: Box::new(ValueExpr::VarRef(VarRefNode::bare("t"))),
            rhs: Box::new(ValueExpr::Literal(Literal::Text("y".into()))),
        });
        let v = eval_expr(&expr, &mut e).await.unwrap();
        assert_eq!(v.as_text(), "xy");
        assert_eq!(v.security.taint, crate::value::Taint::Tainted);
    }
}
