//! Import Evaluation
//!
//! Resolves an import source (file, URL, or resolver reference), guards the
//! shared import stack against cycles, optionally extracts a markdown
//! section by fuzzy heading match, evaluates the module in a child
//! environment, and copies the selected bindings back with import origins
//! attached.

use similar::TextDiff;

use crate::ast::{ImportDirective, ImportSelection};
use crate::env::Environment;
use crate::error::{ErrorContext, MlldError, Result};
use crate::value::{Variable, VariableValue};

use super::{evaluate, expr, BoxFut, InterpContext};

// ---------------------------------------------------------------------------
// Section extraction
// ---------------------------------------------------------------------------

struct Heading {
    line_idx: usize,
    level: usize,
    text: String,
}

fn headings(lines: &[&str]) -> Vec<Heading> {
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level == 0 || level > 6 {
            continue;
        }
        let rest = trimmed[level..].trim();
        if rest.is_empty() && level == trimmed.len() {
            continue;
        }
        out.push(Heading {
            line_idx: idx,
            level,
            text: rest.trim_end_matches('#').trim().to_string(),
        });
    }
    out
}

fn normalize_heading(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized similarity of two heading texts in [0, 1].
fn heading_similarity(a: &str, b: &str) -> f64 {
    TextDiff::from_chars(a, b).ratio() as f64
}

/// Extract a markdown section by heading. Exact normalized matches win;
/// otherwise the best heading with similarity at or above the threshold.
/// The heading line is included in the extract.
pub fn extract_section(content: &str, section: &str, threshold: f64) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let all = headings(&lines);
    if all.is_empty() {
        return None;
    }
    let wanted = normalize_heading(section);

    let mut best: Option<(usize, f64)> = None;
    for (idx, heading) in all.iter().enumerate() {
        let candidate = normalize_heading(&heading.text);
        if candidate == wanted {
            best = Some((idx, 1.0));
            break;
        }
        let score = heading_similarity(&candidate, &wanted);
        if score >= threshold && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((idx, score));
        }
    }

    let (match_idx, _) = best?;
    let start = all[match_idx].line_idx;
    let level = all[match_idx].level;
    let end = all[match_idx + 1..]
        .iter()
        .find(|h| h.level <= level)
        .map(|h| h.line_idx)
        .unwrap_or(lines.len());
    Some(lines[start..end].join("\n"))
}

/// Replace the first heading line's text, keeping its level.
pub fn rename_heading(section: &str, new_text: &str) -> String {
    let mut lines: Vec<String> = section.lines().map(str::to_string).collect();
    for line in lines.iter_mut() {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level > 0 {
            *line = format!("{} {}", "#".repeat(level), new_text);
            break;
        }
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Import directive
// ---------------------------------------------------------------------------

/// Read the module body for an import source.
async fn load_module_content(
    env: &mut Environment,
    source: &str,
) -> Result<(String, String)> {
    // Registry-style references go through the resolver manager
    if env.caps.resolvers.can_resolve(source) {
        let resolvers = env.caps.resolvers.clone();
        let module = resolvers.resolve(source, &env.base_path, None).await?;
        return Ok((source.to_string(), module.content));
    }
    let resolved = env.resolve_path(source)?;
    let content = env.read_path(&resolved).await?;
    Ok((resolved.validated, content))
}

pub fn eval_import_directive<'a>(
    node: &'a ImportDirective,
    env: &'a mut Environment,
) -> BoxFut<'a, Result<()>> {
    Box::pin(async move {
        let (source_text, _) =
            expr::interpolate(&node.source.parts, env, InterpContext::Default).await?;

        let (identity, content) = load_module_content(env, &source_text).await?;

        env.begin_import(&identity)?;
        let result = import_module(node, env, &identity, content).await;
        env.end_import(&identity);
        result
    })
}

async fn import_module(
    node: &ImportDirective,
    env: &mut Environment,
    identity: &str,
    content: String,
) -> Result<()> {
    let content = match &node.section {
        Some(section) => extract_section(&content, section, env.config.section_match_threshold)
            .ok_or_else(|| MlldError::SectionNotFound {
                section: section.clone(),
                path: identity.to_string(),
                ctx: ErrorContext::default(),
            })?,
        None => content,
    };

    let document = crate::parser::parse(&content)?;
    let mut module_env = env.module_env(identity);
    evaluate::evaluate_document(&document, &mut module_env).await?;

    let exported: Vec<Variable> = module_env
        .user_variables()
        .into_iter()
        .filter(|v| !v.flags.is_parameter)
        .cloned()
        .collect();

    let selections: Vec<(String, String)> = match &node.selection {
        ImportSelection::All => exported
            .iter()
            .map(|v| (v.name.clone(), v.name.clone()))
            .collect(),
        ImportSelection::Named(items) => items
            .iter()
            .map(|item| {
                (
                    item.name.clone(),
                    item.alias.clone().unwrap_or_else(|| item.name.clone()),
                )
            })
            .collect(),
    };

    for (source_name, local_name) in selections {
        let variable = exported
            .iter()
            .find(|v| v.name == source_name)
            .ok_or_else(|| MlldError::UnknownVariable {
                name: format!("{} (imported from {})", source_name, identity),
                ctx: ErrorContext::default(),
            })?;

        let mut imported = variable.clone();
        imported.name = local_name;
        imported.flags.is_imported = true;
        imported.flags.import_source = Some(identity.to_string());
        imported.security = imported.security.clone().with_source(identity.to_string());

        // Imported executables carry their module's bindings with them
        if let VariableValue::Executable(def) = &mut imported.value {
            if def.captured_module_env.is_none() {
                let captured = exported
                    .iter()
                    .filter(|v| v.name != source_name)
                    .map(|v| (v.name.clone(), v.clone()))
                    .collect();
                def.captured_module_env = Some(captured);
            }
        }

        env.set_variable(imported)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
# Title

intro

## Setup Guide

step one
step two

### Detail

deep

## Usage

use it
";

    #[test]
    fn test_exact_section_match() {
        let section = extract_section(DOC, "Setup Guide", 0.8).unwrap();
        assert!(section.starts_with("## Setup Guide"));
        assert!(section.contains("step two"));
        assert!(section.contains("### Detail"));
        assert!(!section.contains("## Usage"));
    }

    #[test]
    fn test_fuzzy_section_match() {
        let section = extract_section(DOC, "setup guid", 0.8).unwrap();
        assert!(section.starts_with("## Setup Guide"));
    }

    #[test]
    fn test_section_not_found_below_threshold() {
        assert!(extract_section(DOC, "completely different", 0.8).is_none());
    }

    #[test]
    fn test_section_runs_to_same_level_heading() {
        let section = extract_section(DOC, "Usage", 0.8).unwrap();
        assert_eq!(section.trim_end(), "## Usage\n\nuse it");
    }

    #[test]
    fn test_rename_heading() {
        let renamed = rename_heading("## Old Name\n\nbody", "New Name");
        assert!(renamed.starts_with("## New Name"));
        assert!(renamed.contains("body"));
    }

    #[test]
    fn test_normalize_heading_strips_punctuation() {
        assert_eq!(normalize_heading("  Setup:  Guide!  "), "setup guide");
    }
}
