//! Document Parser
//!
//! Splits a source document into prose (text/newline nodes) and directive
//! nodes. Directive lines begin with a known `/keyword` at column one and
//! may span multiple lines inside brackets or braces; the line break after
//! a directive belongs to the directive, not the prose.

use crate::ast::{
    CodeExpr, CodeLanguage, DirectiveKind, DirectiveNode, DocumentNode, ExeBody, ExeDirective,
    ForDirective, GuardDirective, GuardTarget, GuardTiming, ImportDirective, ImportItem,
    ImportSelection, Node, RunBody, RunDirective, ShowDirective, Span, TemplateKind, TemplateNode,
    TextNode, ValueExpr, VarDirective, WhenDirective, WithClause,
};
use crate::error::Result;

use super::cursor::Cursor;
use super::expression::{
    parse_args, parse_code_body, parse_command_body, parse_expr, parse_for_expr,
    parse_pipeline_stages, parse_single_quoted, parse_template, parse_when_block,
    parse_with_clause,
};

const DIRECTIVE_KEYWORDS: &[&str] = &[
    "var", "show", "run", "exe", "import", "when", "for", "guard",
];

/// Parse a complete source document.
pub fn parse(source: &str) -> Result<DocumentNode> {
    // Line-ending normalization is the parser's job
    let normalized = source.replace("\r\n", "\n");
    let mut c = Cursor::new(&normalized);

    let frontmatter = parse_frontmatter(&mut c);
    let mut nodes = Vec::new();

    while !c.is_eof() {
        if c.at_line_start() && c.peek() == Some('/') {
            if let Some(keyword) = peek_directive_keyword(&c) {
                let start = c.position();
                let kind = parse_directive(&mut c, keyword)?;
                nodes.push(Node::Directive(DirectiveNode {
                    kind,
                    span: Span {
                        start,
                        end: c.position(),
                    },
                }));
                // The directive's own line terminator produces no output
                c.skip_spaces();
                c.eat('\n');
                continue;
            }
        }

        let start = c.position();
        let text = c.take_while(|ch| ch != '\n');
        if !text.is_empty() {
            nodes.push(Node::Text(TextNode {
                content: text,
                span: Span {
                    start,
                    end: c.position(),
                },
            }));
        }
        if c.eat('\n') {
            nodes.push(Node::Newline);
        }
    }

    Ok(DocumentNode { frontmatter, nodes })
}

fn parse_frontmatter(c: &mut Cursor) -> Option<String> {
    if !c.starts_with("---\n") {
        return None;
    }
    // Tentative scan: only commit when a closing fence exists
    let mut probe = String::new();
    let mut offset = 4;
    loop {
        let mut line = String::new();
        loop {
            match c.peek_at(offset) {
                Some('\n') => {
                    offset += 1;
                    break;
                }
                Some(ch) => {
                    line.push(ch);
                    offset += 1;
                }
                None => return None,
            }
        }
        if line.trim_end() == "---" {
            break;
        }
        probe.push_str(&line);
        probe.push('\n');
    }
    for _ in 0..offset {
        c.advance();
    }
    Some(probe)
}

fn peek_directive_keyword(c: &Cursor) -> Option<&'static str> {
    for keyword in DIRECTIVE_KEYWORDS {
        let mut matches = c.peek_at(0) == Some('/');
        for (i, ch) in keyword.chars().enumerate() {
            matches = matches && c.peek_at(1 + i) == Some(ch);
        }
        if matches {
            match c.peek_at(1 + keyword.len()) {
                Some(' ') | Some('\t') => return Some(keyword),
                _ => {}
            }
        }
    }
    None
}

fn parse_directive(c: &mut Cursor, keyword: &str) -> Result<DirectiveKind> {
    c.advance(); // '/'
    c.eat_str(keyword);
    c.skip_spaces();
    match keyword {
        "var" => parse_var(c),
        "show" => Ok(DirectiveKind::Show(ShowDirective {
            value: parse_expr(c)?,
        })),
        "run" => parse_run(c),
        "exe" => parse_exe(c),
        "import" => parse_import(c),
        "when" => Ok(DirectiveKind::When(WhenDirective {
            expr: parse_when_block(c)?,
        })),
        "for" => Ok(DirectiveKind::For(ForDirective {
            expr: parse_for_expr(c)?,
        })),
        "guard" => parse_guard(c),
        _ => Err(c.error(format!("unknown directive '/{}'", keyword))),
    }
}

fn parse_trailing_with(c: &mut Cursor) -> Result<Option<WithClause>> {
    c.skip_spaces();
    if c.eat_keyword("with") {
        Ok(Some(parse_with_clause(c)?))
    } else {
        Ok(None)
    }
}

fn parse_var(c: &mut Cursor) -> Result<DirectiveKind> {
    let mut labels = Vec::new();
    while c.peek() != Some('@') {
        match c.ident() {
            Some(label) => {
                labels.push(label);
                c.skip_spaces();
            }
            None => return Err(c.error("expected '@name' in /var")),
        }
    }
    c.expect('@')?;
    let name = c.ident().ok_or_else(|| c.error("expected variable name"))?;
    c.skip_spaces();
    c.expect('=')?;
    c.skip_spaces();
    let value = parse_expr(c)?;
    let with_clause = parse_trailing_with(c)?;
    Ok(DirectiveKind::Var(VarDirective {
        name,
        labels,
        value,
        with_clause,
    }))
}

fn parse_run_body(c: &mut Cursor) -> Result<RunBody> {
    if c.eat('[') {
        return Ok(RunBody::Command(parse_command_body(c)?));
    }
    let lang = c
        .ident()
        .and_then(|ident| CodeLanguage::parse(&ident))
        .ok_or_else(|| c.error("expected [command] or language { code }"))?;
    c.skip_spaces();
    c.expect('{')?;
    Ok(RunBody::Code(CodeExpr {
        language: lang,
        source: parse_code_body(c)?,
    }))
}

fn parse_run(c: &mut Cursor) -> Result<DirectiveKind> {
    let continue_on_error = c.eat_keyword("continue");
    c.skip_spaces();
    let body = parse_run_body(c)?;
    let with_clause = parse_trailing_with(c)?;
    Ok(DirectiveKind::Run(RunDirective {
        body,
        with_clause,
        continue_on_error,
    }))
}

fn parse_exe(c: &mut Cursor) -> Result<DirectiveKind> {
    c.expect('@')?;
    let name = c.ident().ok_or_else(|| c.error("expected executable name"))?;
    c.expect('(')?;
    let mut params = Vec::new();
    loop {
        c.skip_ws();
        if c.eat(')') {
            break;
        }
        // Parameters may be written bare or with a leading @
        c.eat('@');
        params.push(c.ident().ok_or_else(|| c.error("expected parameter name"))?);
        c.skip_ws();
        c.eat(',');
    }
    c.skip_spaces();
    c.expect('=')?;
    c.skip_spaces();
    let body = parse_exe_body(c)?;
    let with_clause = parse_trailing_with(c)?;
    Ok(DirectiveKind::Exe(ExeDirective {
        name,
        params,
        body,
        with_clause,
    }))
}

fn parse_exe_body(c: &mut Cursor) -> Result<ExeBody> {
    match c.peek() {
        Some('[') => {
            c.advance();
            return Ok(ExeBody::Command(parse_command_body(c)?));
        }
        Some('"') => {
            c.advance();
            return Ok(ExeBody::Template(parse_template(c, TemplateKind::DoubleQuote)?));
        }
        Some('`') => {
            c.advance();
            return Ok(ExeBody::Template(parse_template(c, TemplateKind::Backtick)?));
        }
        Some(':') if c.starts_with("::") => {
            c.eat_str("::");
            return Ok(ExeBody::Template(parse_template(c, TemplateKind::Colon)?));
        }
        Some('<') => return parse_exe_section(c),
        Some('@') => return parse_exe_reference(c),
        _ => {}
    }

    if c.eat_keyword("when") {
        c.skip_spaces();
        return Ok(ExeBody::When(parse_when_block(c)?));
    }
    if c.eat_keyword("for") {
        return Ok(ExeBody::For(Box::new(parse_for_expr(c)?)));
    }
    if c.eat_keyword("pipeline") {
        c.skip_spaces();
        return Ok(ExeBody::Pipeline {
            stages: parse_pipeline_stages(c)?,
            format: None,
        });
    }
    if c.eat_keyword("run") {
        c.skip_spaces();
        return match parse_run_body(c)? {
            RunBody::Command(cmd) => Ok(ExeBody::Command(cmd)),
            RunBody::Code(code) => Ok(ExeBody::Code(code)),
        };
    }
    // `js { ... }` and friends
    if let Some(lang) = peek_language(c) {
        c.eat_str(lang);
        c.skip_spaces();
        c.expect('{')?;
        return Ok(ExeBody::Code(CodeExpr {
            language: CodeLanguage::parse(lang).expect("known language"),
            source: parse_code_body(c)?,
        }));
    }
    // Anything else is a data builder
    Ok(ExeBody::Data(Box::new(parse_expr(c)?)))
}

fn peek_language(c: &Cursor) -> Option<&'static str> {
    for lang in ["js", "node", "python", "py", "bash", "sh"] {
        if c.starts_with(lang) {
            let mut offset = lang.len();
            if c.peek_at(offset)
                .map(super::cursor::is_ident_char)
                .unwrap_or(false)
            {
                continue;
            }
            while matches!(c.peek_at(offset), Some(' ') | Some('\t')) {
                offset += 1;
            }
            if c.peek_at(offset) == Some('{') {
                return Some(lang);
            }
        }
    }
    None
}

fn parse_exe_section(c: &mut Cursor) -> Result<ExeBody> {
    c.expect('<')?;
    let mut raw = String::new();
    loop {
        match c.advance() {
            Some('>') => break,
            Some(ch) => raw.push(ch),
            None => return Err(c.error("unterminated '<path # section>'")),
        }
    }
    let (path, section) = match raw.find('#') {
        Some(idx) => (raw[..idx].trim().to_string(), raw[idx + 1..].trim().to_string()),
        None => return Err(c.error("section executable needs '<path # Section>'")),
    };
    c.skip_spaces();
    let rename = if c.eat_keyword("as") {
        c.skip_spaces();
        c.expect('"')?;
        Some(parse_template(c, TemplateKind::DoubleQuote)?)
    } else {
        None
    };
    Ok(ExeBody::Section {
        path: TemplateNode::literal(TemplateKind::DoubleQuote, path),
        section: TemplateNode::literal(TemplateKind::DoubleQuote, section),
        rename,
    })
}

fn parse_exe_reference(c: &mut Cursor) -> Result<ExeBody> {
    c.expect('@')?;
    let first = c.ident().ok_or_else(|| c.error("expected name after '@'"))?;
    if c.peek() == Some('/') {
        // Resolver route: @prefix/path/to/resource
        let mut path = format!("@{}", first);
        path.push_str(&c.take_while(|ch| !ch.is_whitespace() && ch != '('));
        let payload = if c.eat('(') {
            c.skip_ws();
            if c.eat(')') {
                None
            } else {
                let expr = parse_expr(c)?;
                c.skip_ws();
                c.expect(')')?;
                Some(Box::new(expr))
            }
        } else {
            None
        };
        return Ok(ExeBody::Resolver { path, payload });
    }
    let args = if c.eat('(') { parse_args(c)? } else { Vec::new() };
    Ok(ExeBody::CommandRef {
        target: first,
        args,
    })
}

fn parse_import(c: &mut Cursor) -> Result<DirectiveKind> {
    let selection = if c.eat('*') {
        ImportSelection::All
    } else if c.eat('{') {
        let mut items = Vec::new();
        loop {
            c.skip_ws();
            if c.eat('}') {
                break;
            }
            let name = c.ident().ok_or_else(|| c.error("expected import name"))?;
            c.skip_spaces();
            let alias = if c.eat_keyword("as") {
                c.skip_spaces();
                Some(c.ident().ok_or_else(|| c.error("expected alias name"))?)
            } else {
                None
            };
            items.push(ImportItem { name, alias });
            c.skip_ws();
            c.eat(',');
        }
        ImportSelection::Named(items)
    } else {
        return Err(c.error("expected '*' or '{ names }' in /import"));
    };

    c.skip_spaces();
    if !c.eat_keyword("from") {
        return Err(c.error("expected 'from' in /import"));
    }
    c.skip_spaces();

    let (source, section) = match c.peek() {
        Some('"') => {
            c.advance();
            let template = parse_template(c, TemplateKind::DoubleQuote)?;
            split_section(template)
        }
        Some('\'') => {
            let raw = parse_single_quoted(c)?;
            split_section(TemplateNode::literal(TemplateKind::DoubleQuote, raw))
        }
        _ => return Err(c.error("expected quoted import path")),
    };

    Ok(DirectiveKind::Import(ImportDirective {
        selection,
        source,
        section,
    }))
}

/// `"path#Section"` → path template + section. Only a literal tail is
/// searched for the fragment marker.
fn split_section(template: TemplateNode) -> (TemplateNode, Option<String>) {
    use crate::ast::TemplatePart;
    let mut parts = template.parts.clone();
    if let Some(TemplatePart::Text(last)) = parts.last_mut() {
        if let Some(idx) = last.find('#') {
            let section = last[idx + 1..].trim().to_string();
            let remainder = last[..idx].trim_end().to_string();
            *last = remainder;
            let section = if section.is_empty() { None } else { Some(section) };
            return (
                TemplateNode {
                    kind: template.kind,
                    parts,
                },
                section,
            );
        }
    }
    (template, None)
}

fn parse_guard(c: &mut Cursor) -> Result<DirectiveKind> {
    let timing = if c.eat_keyword("before") {
        GuardTiming::Before
    } else if c.eat_keyword("after") {
        GuardTiming::After
    } else {
        return Err(c.error("expected 'before' or 'after' in /guard"));
    };
    c.skip_spaces();
    c.expect('@')?;
    let name = c.ident().ok_or_else(|| c.error("expected guard name"))?;
    c.skip_spaces();
    if !c.eat_keyword("for") {
        return Err(c.error("expected 'for' in /guard"));
    }
    c.skip_spaces();
    let target = if c.eat('@') {
        GuardTarget::Executable(c.ident().ok_or_else(|| c.error("expected executable name"))?)
    } else {
        GuardTarget::Label(c.ident().ok_or_else(|| c.error("expected label name"))?)
    };
    c.skip_spaces();
    c.expect('=')?;
    c.skip_spaces();
    if !c.eat_keyword("when") {
        return Err(c.error("guard body must be a when block"));
    }
    c.skip_spaces();
    let body = parse_when_block(c)?;
    Ok(DirectiveKind::Guard(GuardDirective {
        name,
        timing,
        target,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Literal, TemplatePart};

    fn directives(source: &str) -> Vec<DirectiveKind> {
        parse(source)
            .unwrap()
            .nodes
            .into_iter()
            .filter_map(|n| match n {
                Node::Directive(d) => Some(d.kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_prose_round_trip_shape() {
        let doc = parse("Hello\n\nworld").unwrap();
        assert_eq!(doc.nodes.len(), 4);
        assert!(matches!(&doc.nodes[0], Node::Text(t) if t.content == "Hello"));
        assert!(matches!(doc.nodes[1], Node::Newline));
        assert!(matches!(doc.nodes[2], Node::Newline));
        assert!(matches!(&doc.nodes[3], Node::Text(t) if t.content == "world"));
    }

    #[test]
    fn test_var_directive() {
        let ds = directives("/var @x = \"Hello\"\n");
        match &ds[0] {
            DirectiveKind::Var(v) => {
                assert_eq!(v.name, "x");
                assert!(v.labels.is_empty());
                assert!(matches!(v.value, ValueExpr::Template(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_var_with_label_and_pipeline() {
        let ds = directives(
            "/var retryable @pipelineValue = \"seed\" with { pipeline: [@flakyStage] }\n",
        );
        match &ds[0] {
            DirectiveKind::Var(v) => {
                assert_eq!(v.labels, vec!["retryable".to_string()]);
                let with_clause = v.with_clause.as_ref().unwrap();
                assert_eq!(with_clause.pipeline.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exe_js_directive() {
        let ds = directives(
            "/exe @flakyStage(value) = js { globalThis.__n = (globalThis.__n || 0) + 1; return globalThis.__n === 1 ? \"bad\" : \"ok\"; }\n",
        );
        match &ds[0] {
            DirectiveKind::Exe(e) => {
                assert_eq!(e.name, "flakyStage");
                assert_eq!(e.params, vec!["value".to_string()]);
                match &e.body {
                    ExeBody::Code(code) => {
                        assert_eq!(code.language, CodeLanguage::Js);
                        assert!(code.source.contains("globalThis.__n === 1"));
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exe_nested_for() {
        let ds =
            directives("/exe @cross(l1, l2) = for @x in @l1 => for @y in @l2 => @combine(@x, @y)\n");
        match &ds[0] {
            DirectiveKind::Exe(e) => {
                assert!(matches!(e.body, ExeBody::For(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_run_directive() {
        let ds = directives("/run [echo hi && rm -rf /]\n");
        match &ds[0] {
            DirectiveKind::Run(r) => match &r.body {
                RunBody::Command(cmd) => {
                    assert!(matches!(&cmd.parts[0], TemplatePart::Text(t) if t.contains("&&")));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_import_star() {
        let ds = directives("/import * from \"./b.mld\"\n");
        match &ds[0] {
            DirectiveKind::Import(i) => {
                assert_eq!(i.selection, ImportSelection::All);
                assert!(i.section.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_import_named_with_alias_and_section() {
        let ds = directives("/import { a, b as c } from \"./lib.mld#Helpers\"\n");
        match &ds[0] {
            DirectiveKind::Import(i) => {
                match &i.selection {
                    ImportSelection::Named(items) => {
                        assert_eq!(items[0].name, "a");
                        assert_eq!(items[1].alias.as_deref(), Some("c"));
                    }
                    other => panic!("unexpected {:?}", other),
                }
                assert_eq!(i.section.as_deref(), Some("Helpers"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_guard_directive_multiline() {
        let source = "/guard after @pipelineRetry for retryable = when [\n  @output != \"ok\" && @mx.guard.try < 3 => retry \"need ok from pipeline\"\n  @output != \"ok\" => deny \"still invalid\"\n  * => allow\n]\n";
        let ds = directives(source);
        match &ds[0] {
            DirectiveKind::Guard(g) => {
                assert_eq!(g.name, "pipelineRetry");
                assert_eq!(g.timing, GuardTiming::After);
                assert_eq!(g.target, GuardTarget::Label("retryable".into()));
                assert_eq!(g.body.clauses.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_directive_consumes_own_newline() {
        let doc = parse("/var @x = 'v'\ntext\n").unwrap();
        // No newline node between the directive and the prose
        assert!(matches!(doc.nodes[0], Node::Directive(_)));
        assert!(matches!(&doc.nodes[1], Node::Text(t) if t.content == "text"));
    }

    #[test]
    fn test_frontmatter() {
        let doc = parse("---\ntitle: Test\n---\nbody\n").unwrap();
        assert_eq!(doc.frontmatter.as_deref(), Some("title: Test\n"));
        assert!(matches!(&doc.nodes[0], Node::Text(t) if t.content == "body"));
    }

    #[test]
    fn test_slash_in_prose_is_text() {
        let doc = parse("/ not a directive\n/varx = 2\n").unwrap();
        assert!(matches!(&doc.nodes[0], Node::Text(_)));
        assert!(matches!(&doc.nodes[2], Node::Text(t) if t.content == "/varx = 2"));
    }

    #[test]
    fn test_show_accessor_chain() {
        let ds = directives("/show @s.split(\", \")[1].toLowerCase()\n");
        match &ds[0] {
            DirectiveKind::Show(s) => {
                assert!(matches!(&s.value, ValueExpr::VarRef(v) if v.accessors.len() == 3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exe_command_ref() {
        let ds = directives("/exe @alias(x) = @other(@x)\n");
        match &ds[0] {
            DirectiveKind::Exe(e) => match &e.body {
                ExeBody::CommandRef { target, args } => {
                    assert_eq!(target, "other");
                    assert_eq!(args.len(), 1);
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exe_resolver_body() {
        let ds = directives("/exe @fetchMod(q) = @registry/tools/search(@q)\n");
        match &ds[0] {
            DirectiveKind::Exe(e) => match &e.body {
                ExeBody::Resolver { path, payload } => {
                    assert_eq!(path, "@registry/tools/search");
                    assert!(payload.is_some());
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_var_object_literal() {
        let ds = directives("/var @cfg = { name: 'x', n: 3 }\n");
        match &ds[0] {
            DirectiveKind::Var(v) => match &v.value {
                ValueExpr::Object(entries) => {
                    assert_eq!(entries.len(), 2);
                    assert!(matches!(
                        &entries[1].1,
                        ValueExpr::Literal(Literal::Number(n)) if n.as_i64() == Some(3)
                    ));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
