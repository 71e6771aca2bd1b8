//! Pipeline Engine
//!
//! Threads a structured value through ordered stages. A stage may be a
//! parallel fan-out group whose sub-stages run concurrently on the same
//! input and reassemble in declaration order. A stage signalling `retry`
//! re-invokes the retryable producer (the `/var` RHS or the invocation the
//! pipeline hangs off) up to the configured budget; the retry reason is
//! visible to the next attempt as `@mx.pipeline.retry`. Descriptors merge
//! monotonically across every stage boundary.

use serde_json::Value;

use crate::ast::{ExecInvocationNode, PipelineFormat, StageCallNode, StageNode, ValueExpr};
use crate::env::Environment;
use crate::error::{ErrorContext, MlldError, Result};
use crate::value::StructuredValue;

use super::{expr, guard, invocation, BoxFut, Outcome};

/// The producer a retrying stage re-invokes.
#[derive(Clone, Copy)]
pub enum RetrySource<'a> {
    /// No retryable producer: retries restart from the original input
    None,
    /// A `/var` RHS retained as a source function
    Expr(&'a ValueExpr),
    /// The invocation the pipeline is attached to
    Invocation(&'a ExecInvocationNode),
}

async fn rerun_source<'a>(
    source: RetrySource<'a>,
    original_input: &StructuredValue,
    env: &mut Environment,
) -> Result<StructuredValue> {
    match source {
        RetrySource::None => Ok(original_input.clone()),
        RetrySource::Expr(rhs) => expr::eval_expr(rhs, env).await,
        RetrySource::Invocation(node) => match invocation::invoke_core(node, env).await? {
            Outcome::Value(v) => Ok(v),
            Outcome::Deny(reason) => Err(MlldError::GuardDenied {
                reason: reason.unwrap_or_else(|| "denied".to_string()),
                guard: node.target.join("."),
                ctx: ErrorContext::at(node.span),
            }),
            Outcome::Retry(_) => Err(MlldError::InvalidStructuredValue {
                message: "source stage requested retry of itself".to_string(),
                ctx: ErrorContext::at(node.span),
            }),
        },
    }
}

/// Run a pipeline over an input value.
pub fn run_pipeline<'a>(
    input: StructuredValue,
    stages: &'a [StageNode],
    format: Option<PipelineFormat>,
    stream: bool,
    env: &'a mut Environment,
    source: RetrySource<'a>,
) -> BoxFut<'a, Result<StructuredValue>> {
    Box::pin(async move {
        let original_input = input.clone();
        let mut current = coerce(input, format)?;
        let mut stage_retries = vec![0u32; stages.len()];
        let mut pipeline_try: u32 = 1;
        let mut retry_reason: Option<String> = None;

        let mut idx = 0;
        while idx < stages.len() {
            let outcome = run_stage(
                &stages[idx],
                current.clone(),
                env,
                pipeline_try,
                retry_reason.as_deref(),
            )
            .await
            .map_err(|cause| MlldError::PipelineStageFailed {
                stage: idx,
                cause: Box::new(cause),
                ctx: ErrorContext::default(),
            })?;

            match outcome {
                Outcome::Value(mut value) => {
                    value.absorb_security(&current.security);
                    if stream && env.caps.streaming.is_enabled() {
                        env.caps.streaming.emit(value.as_text());
                    }
                    current = value;
                    idx += 1;
                }
                Outcome::Retry(reason) => {
                    stage_retries[idx] += 1;
                    if stage_retries[idx] > env.config.pipeline_retry_max {
                        return Err(MlldError::PipelineRetryExhausted {
                            stage: idx,
                            budget: env.config.pipeline_retry_max,
                            ctx: ErrorContext::default(),
                        });
                    }
                    pipeline_try += 1;
                    retry_reason = reason;
                    let refreshed = rerun_source(source, &original_input, env).await?;
                    current = coerce(refreshed, format)?;
                    idx = 0;
                }
                Outcome::Deny(reason) => {
                    return Err(MlldError::GuardDenied {
                        reason: reason.unwrap_or_else(|| "denied".to_string()),
                        guard: format!("pipeline stage {}", idx),
                        ctx: ErrorContext::default(),
                    });
                }
            }
        }

        coerce(current, format)
    })
}

async fn run_stage(
    stage: &StageNode,
    input: StructuredValue,
    env: &mut Environment,
    pipeline_try: u32,
    retry_reason: Option<&str>,
) -> Result<Outcome> {
    match stage {
        StageNode::Single(call) => {
            invoke_stage(call, input, env, pipeline_try, retry_reason).await
        }
        StageNode::Parallel(calls) => {
            // Each sub-stage runs on its own environment snapshot; results
            // reassemble in declaration order.
            let mut handles = Vec::with_capacity(calls.len());
            for call in calls {
                let call = call.clone();
                let input = input.clone();
                let mut snapshot = env.clone();
                let reason = retry_reason.map(str::to_string);
                handles.push(tokio::spawn(async move {
                    invoke_stage(&call, input, &mut snapshot, pipeline_try, reason.as_deref())
                        .await
                }));
            }
            let mut results = Vec::with_capacity(handles.len());
            let mut security = input.security.clone();
            for handle in handles {
                let outcome = handle.await.map_err(|e| MlldError::Io {
                    operation: "parallel stage join".to_string(),
                    message: e.to_string(),
                    ctx: ErrorContext::default(),
                })??;
                match outcome {
                    Outcome::Value(v) => {
                        security = security.merge(&v.security);
                        results.push(v.as_data());
                    }
                    other => return Ok(other),
                }
            }
            Ok(Outcome::Value(
                StructuredValue::wrap(Value::Array(results)).with_security(security),
            ))
        }
    }
}

/// One stage call: the stage input becomes the first argument, then any
/// written arguments; `@mx.pipeline` reflects the current attempt.
pub async fn invoke_stage(
    call: &StageCallNode,
    input: StructuredValue,
    env: &mut Environment,
    pipeline_try: u32,
    retry_reason: Option<&str>,
) -> Result<Outcome> {
    env.push_scope();
    let result = async {
        guard::bind_mx(env, None, Some(pipeline_try), retry_reason)?;
        let mut args = vec![input.clone()];
        args.extend(invocation::eval_args(&call.args, env).await?);
        let labels: Vec<String> = input.security.labels.iter().cloned().collect();
        invocation::invoke_named(&call.target, args, &labels, env).await
    }
    .await;
    env.pop_scope();
    result
}

/// Format coercion at pipeline entry/exit.
fn coerce(value: StructuredValue, format: Option<PipelineFormat>) -> Result<StructuredValue> {
    let Some(format) = format else {
        return Ok(value);
    };
    let security = value.security.clone();
    let provenance = value.provenance.clone();
    let coerced = match format {
        PipelineFormat::Text => StructuredValue::text(value.as_text().to_string()),
        PipelineFormat::Json => match value.as_data() {
            Value::String(text) => {
                let parsed: Value =
                    serde_json::from_str(text.trim()).map_err(|e| MlldError::InvalidStructuredValue {
                        message: format!("value is not JSON: {}", e),
                        ctx: ErrorContext::default(),
                    })?;
                StructuredValue::wrap(parsed)
            }
            data => StructuredValue::wrap(data),
        },
        PipelineFormat::Array => match value.as_data() {
            Value::Array(items) => StructuredValue::wrap(Value::Array(items)),
            single => StructuredValue::wrap(Value::Array(vec![single])),
        },
    };
    let mut coerced = coerced.with_security(security);
    coerced.provenance = provenance;
    Ok(coerced)
}
