//! Document Evaluation
//!
//! Walks the parsed node sequence in source order. Prose text and newlines
//! append to the output buffer verbatim; directives dispatch to their
//! evaluators. Shown and run outputs end in a newline; non-output
//! directives contribute nothing to the document.

use crate::ast::{DirectiveKind, DirectiveNode, DocumentNode, Node};
use crate::env::{Environment, GuardDef};
use crate::error::Result;

use super::when::append_shown;
use super::{expr, import, r#for, run, var, when, BoxFut};

/// Parse and evaluate a source string, returning the rendered document.
pub async fn evaluate_source(source: &str, env: &mut Environment) -> Result<String> {
    let document = crate::parser::parse(source)?;
    evaluate_document(&document, env).await?;
    Ok(env.render_output())
}

/// Evaluate a parsed document into the environment's output buffer.
pub fn evaluate_document<'a>(
    document: &'a DocumentNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        if let Some(frontmatter) = &document.frontmatter {
            env.set_frontmatter(frontmatter);
        }
        for node in &document.nodes {
            match node {
                Node::Text(text) => env.append_doc(text.content.clone()),
                Node::Newline => env.append_doc("\n"),
                Node::Directive(directive) => evaluate_directive(directive, env).await?,
            }
        }
        Ok(())
    })
}

/// Dispatch one directive to its evaluator, attaching location context to
/// failures.
pub fn evaluate_directive<'a>(
    directive: &'a DirectiveNode,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        let result = match &directive.kind {
            DirectiveKind::Var(node) => var::eval_var_directive(node, env).await,
            DirectiveKind::Show(node) => match expr::eval_expr(&node.value, env).await {
                Ok(value) => {
                    append_shown(env, value.as_text());
                    Ok(())
                }
                Err(e) => Err(e),
            },
            DirectiveKind::Run(node) => run::eval_run_directive(node, env).await,
            DirectiveKind::Exe(node) => var::eval_exe_directive(node, env).await,
            DirectiveKind::Import(node) => import::eval_import_directive(node, env).await,
            DirectiveKind::When(node) => when::eval_when_directive(&node.expr, env).await,
            DirectiveKind::For(node) => r#for::eval_for_directive(&node.expr, env).await,
            DirectiveKind::Guard(node) => {
                env.register_guard(GuardDef {
                    name: node.name.clone(),
                    timing: node.timing,
                    target: node.target.clone(),
                    body: node.body.clone(),
                });
                Ok(())
            }
        };
        result.map_err(|e| {
            e.with_context(|ctx| {
                if ctx.span.is_none() {
                    ctx.span = Some(directive.span);
                }
                if ctx.directive.is_none() {
                    ctx.directive = Some(directive_name(&directive.kind).to_string());
                }
                if ctx.file.is_none() {
                    ctx.file = env.current_file.clone();
                }
            })
        })
    })
}

fn directive_name(kind: &DirectiveKind) -> &'static str {
    match kind {
        DirectiveKind::Var(_) => "var",
        DirectiveKind::Show(_) => "show",
        DirectiveKind::Run(_) => "run",
        DirectiveKind::Exe(_) => "exe",
        DirectiveKind::Import(_) => "import",
        DirectiveKind::When(_) => "when",
        DirectiveKind::For(_) => "for",
        DirectiveKind::Guard(_) => "guard",
    }
}
