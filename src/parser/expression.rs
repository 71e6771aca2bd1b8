//! Expression Parser
//!
//! Recursive-descent parsing for directive right-hand sides: literals,
//! templates with `@var` interpolation, object/array literals, variable
//! references with accessor chains, exec invocations, commands, code
//! blocks, `when`/`for`/`foreach` forms, and with-clauses.

use serde_json::Number;

use crate::ast::{
    Accessor, BinaryExprNode, BinaryOp, CodeExpr, CodeLanguage, CommandExpr, ExecInvocationNode,
    ForBody, ForExprNode, ForeachNode, Literal, LoadContentNode, PipelineFormat, StageCallNode,
    StageNode, TemplateKind, TemplateNode, TemplatePart, ValueExpr, VarRefNode, WhenAction,
    WhenClause, WhenCondition, WhenExprNode, WithClause,
};
use crate::error::{MlldError, Result};

use super::cursor::{is_ident_char, Cursor};

// ---------------------------------------------------------------------------
// Entry: precedence climbing
// ---------------------------------------------------------------------------

pub fn parse_expr(c: &mut Cursor) -> Result<ValueExpr> {
    parse_or(c)
}

fn parse_or(c: &mut Cursor) -> Result<ValueExpr> {
    let mut lhs = parse_and(c)?;
    loop {
        c.skip_spaces();
        if c.starts_with("||") {
            c.eat_str("||");
            c.skip_spaces();
            let rhs = parse_and(c)?;
            lhs = ValueExpr::Binary(BinaryExprNode {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        } else {
            return Ok(lhs);
        }
    }
}

fn parse_and(c: &mut Cursor) -> Result<ValueExpr> {
    let mut lhs = parse_comparison(c)?;
    loop {
        c.skip_spaces();
        if c.starts_with("&&") {
            c.eat_str("&&");
            c.skip_spaces();
            let rhs = parse_comparison(c)?;
            lhs = ValueExpr::Binary(BinaryExprNode {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        } else {
            return Ok(lhs);
        }
    }
}

fn comparison_op(c: &mut Cursor) -> Option<BinaryOp> {
    for (text, op) in [
        ("==", BinaryOp::Eq),
        ("!=", BinaryOp::Ne),
        ("<=", BinaryOp::Le),
        (">=", BinaryOp::Ge),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
    ] {
        if c.starts_with(text) {
            c.eat_str(text);
            return Some(op);
        }
    }
    None
}

fn parse_comparison(c: &mut Cursor) -> Result<ValueExpr> {
    let lhs = parse_additive(c)?;
    c.skip_spaces();
    if c.starts_with("=>") {
        return Ok(lhs);
    }
    if let Some(op) = comparison_op(c) {
        c.skip_spaces();
        let rhs = parse_additive(c)?;
        return Ok(ValueExpr::Binary(BinaryExprNode {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }));
    }
    Ok(lhs)
}

fn parse_additive(c: &mut Cursor) -> Result<ValueExpr> {
    let mut lhs = parse_unary(c)?;
    loop {
        c.skip_spaces();
        if c.peek() == Some('+') {
            c.advance();
            c.skip_spaces();
            let rhs = parse_unary(c)?;
            lhs = ValueExpr::Binary(BinaryExprNode {
                op: BinaryOp::Add,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        } else {
            return Ok(lhs);
        }
    }
}

fn parse_unary(c: &mut Cursor) -> Result<ValueExpr> {
    c.skip_spaces();
    if c.peek() == Some('!') && c.peek_at(1) != Some('=') {
        c.advance();
        let inner = parse_unary(c)?;
        return Ok(ValueExpr::Not(Box::new(inner)));
    }
    parse_primary(c)
}

// ---------------------------------------------------------------------------
// Primary forms
// ---------------------------------------------------------------------------

fn parse_primary(c: &mut Cursor) -> Result<ValueExpr> {
    c.skip_spaces();
    match c.peek() {
        Some('\'') => parse_single_quoted(c).map(|s| ValueExpr::Literal(Literal::Text(s))),
        Some('"') => {
            c.advance();
            Ok(ValueExpr::Template(parse_template(c, TemplateKind::DoubleQuote)?))
        }
        Some('`') => {
            c.advance();
            Ok(ValueExpr::Template(parse_template(c, TemplateKind::Backtick)?))
        }
        Some(':') if c.starts_with("::") => {
            c.eat_str("::");
            Ok(ValueExpr::Template(parse_template(c, TemplateKind::Colon)?))
        }
        Some('{') => parse_object(c),
        Some('[') => parse_array(c),
        Some('<') => parse_load_content(c),
        Some('@') => {
            c.advance();
            parse_reference(c)
        }
        Some('(') => {
            c.advance();
            let inner = parse_expr(c)?;
            c.skip_ws();
            c.expect(')')?;
            Ok(inner)
        }
        Some(d) if d.is_ascii_digit() => parse_number(c),
        Some('-') if c.peek_at(1).map(|d| d.is_ascii_digit()).unwrap_or(false) => parse_number(c),
        _ => parse_keyword_form(c),
    }
}

fn parse_keyword_form(c: &mut Cursor) -> Result<ValueExpr> {
    if c.eat_keyword("true") {
        return Ok(ValueExpr::Literal(Literal::Bool(true)));
    }
    if c.eat_keyword("false") {
        return Ok(ValueExpr::Literal(Literal::Bool(false)));
    }
    if c.eat_keyword("null") {
        return Ok(ValueExpr::Literal(Literal::Null));
    }
    if c.eat_keyword("when") {
        c.skip_spaces();
        return Ok(ValueExpr::When(parse_when_block(c)?));
    }
    if c.eat_keyword("for") {
        return Ok(ValueExpr::For(Box::new(parse_for_expr(c)?)));
    }
    if c.eat_keyword("foreach") {
        return parse_foreach(c);
    }
    if c.eat_keyword("run") {
        c.skip_spaces();
        if c.eat('[') {
            return Ok(ValueExpr::Command(parse_command_body(c)?));
        }
        return parse_code_form(c)
            .ok_or_else(|| c.error("expected [command] or language { code } after 'run'"))?;
    }
    if let Some(code) = parse_code_form(c) {
        return code;
    }
    Err(c.error(format!(
        "expected a value, found {}",
        c.peek()
            .map(|ch| format!("'{}'", ch))
            .unwrap_or_else(|| "end of input".to_string())
    )))
}

/// `js { ... }`, `python { ... }`, etc. Returns None when the next token is
/// not a known language followed by an opening brace.
fn parse_code_form(c: &mut Cursor) -> Option<Result<ValueExpr>> {
    for lang in ["js", "node", "python", "py", "bash", "sh"] {
        if c.starts_with(lang) {
            let after = c.peek_at(lang.len());
            let boundary_ok = !after.map(is_ident_char).unwrap_or(false);
            if boundary_ok {
                // Look ahead past spaces for '{'
                let mut offset = lang.len();
                while matches!(c.peek_at(offset), Some(' ') | Some('\t')) {
                    offset += 1;
                }
                if c.peek_at(offset) == Some('{') {
                    c.eat_str(lang);
                    c.skip_spaces();
                    c.advance();
                    let language = CodeLanguage::parse(lang).expect("known language");
                    return Some(
                        parse_code_body(c).map(|source| {
                            ValueExpr::Code(CodeExpr { language, source })
                        }),
                    );
                }
            }
        }
    }
    None
}

fn parse_number(c: &mut Cursor) -> Result<ValueExpr> {
    let mut text = String::new();
    if c.peek() == Some('-') {
        text.push('-');
        c.advance();
    }
    text.push_str(&c.take_while(|ch| ch.is_ascii_digit()));
    if c.peek() == Some('.') && c.peek_at(1).map(|d| d.is_ascii_digit()).unwrap_or(false) {
        text.push('.');
        c.advance();
        text.push_str(&c.take_while(|ch| ch.is_ascii_digit()));
    }
    let number: Number = text
        .parse::<i64>()
        .map(Number::from)
        .or_else(|_| text.parse::<f64>().map_err(|_| ()).and_then(|f| Number::from_f64(f).ok_or(())))
        .map_err(|_| c.error(format!("invalid number '{}'", text)))?;
    Ok(ValueExpr::Literal(Literal::Number(number)))
}

pub fn parse_single_quoted(c: &mut Cursor) -> Result<String> {
    c.expect('\'')?;
    let mut out = String::new();
    loop {
        match c.advance() {
            Some('\'') => return Ok(out),
            Some('\\') => match c.advance() {
                Some('\'') => out.push('\''),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => return Err(c.error("unterminated string")),
            },
            Some(ch) => out.push(ch),
            None => return Err(c.error("unterminated string")),
        }
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

fn parse_object(c: &mut Cursor) -> Result<ValueExpr> {
    c.expect('{')?;
    let mut entries = Vec::new();
    loop {
        c.skip_ws();
        if c.eat('}') {
            return Ok(ValueExpr::Object(entries));
        }
        let key = if c.peek() == Some('"') || c.peek() == Some('\'') {
            parse_string_key(c)?
        } else {
            c.ident().ok_or_else(|| c.error("expected object key"))?
        };
        c.skip_ws();
        c.expect(':')?;
        c.skip_ws();
        let value = parse_expr(c)?;
        entries.push((key, value));
        c.skip_ws();
        if !c.eat(',') {
            c.skip_ws();
            c.expect('}')?;
            return Ok(ValueExpr::Object(entries));
        }
    }
}

fn parse_string_key(c: &mut Cursor) -> Result<String> {
    if c.peek() == Some('\'') {
        return parse_single_quoted(c);
    }
    c.expect('"')?;
    let mut out = String::new();
    loop {
        match c.advance() {
            Some('"') => return Ok(out),
            Some('\\') => match c.advance() {
                Some(ch) => out.push(ch),
                None => return Err(c.error("unterminated string")),
            },
            Some(ch) => out.push(ch),
            None => return Err(c.error("unterminated string")),
        }
    }
}

fn parse_array(c: &mut Cursor) -> Result<ValueExpr> {
    c.expect('[')?;
    let mut items = Vec::new();
    loop {
        c.skip_ws();
        if c.eat(']') {
            return Ok(ValueExpr::Array(items));
        }
        items.push(parse_expr(c)?);
        c.skip_ws();
        if !c.eat(',') {
            c.skip_ws();
            c.expect(']')?;
            return Ok(ValueExpr::Array(items));
        }
    }
}

// ---------------------------------------------------------------------------
// References, accessors, invocations
// ---------------------------------------------------------------------------

/// After the `@`: a variable reference or an exec invocation.
pub fn parse_reference(c: &mut Cursor) -> Result<ValueExpr> {
    let start = c.position();
    let name = c.ident().ok_or_else(|| c.error("expected name after '@'"))?;

    if c.peek() == Some('(') {
        c.advance();
        let args = parse_args(c)?;
        let accessors = parse_accessors(c)?;
        return Ok(ValueExpr::ExecInvocation(ExecInvocationNode {
            target: vec![name],
            args,
            accessors,
            with_clause: None,
            span: c.span_from(start),
        }));
    }

    let accessors = parse_accessors(c)?;
    Ok(ValueExpr::VarRef(VarRefNode {
        name,
        accessors,
        span: c.span_from(start),
    }))
}

/// `.field`, `.method(args)`, `[3]`, `["key"]`, `[@expr]`
pub fn parse_accessors(c: &mut Cursor) -> Result<Vec<Accessor>> {
    let mut out = Vec::new();
    loop {
        if c.peek() == Some('.')
            && c.peek_at(1)
                .map(|ch| ch.is_ascii_alphabetic() || ch == '_')
                .unwrap_or(false)
        {
            c.advance();
            let name = c.ident().ok_or_else(|| c.error("expected field name"))?;
            if c.peek() == Some('(') {
                c.advance();
                let args = parse_args(c)?;
                out.push(Accessor::Call { name, args });
            } else {
                out.push(Accessor::Field(name));
            }
        } else if c.peek() == Some('[') {
            // Only index forms; a space after '[' would be an array literal
            let next = c.peek_at(1);
            let is_index = matches!(next, Some(ch) if ch.is_ascii_digit() || ch == '-' || ch == '"' || ch == '\'' || ch == '@');
            if !is_index {
                return Ok(out);
            }
            c.advance();
            c.skip_ws();
            let accessor = match c.peek() {
                Some('"') | Some('\'') => Accessor::Expr(Box::new(ValueExpr::Literal(
                    Literal::Text(parse_string_key(c)?),
                ))),
                Some('@') => {
                    c.advance();
                    Accessor::Expr(Box::new(parse_reference(c)?))
                }
                _ => {
                    let number = parse_number(c)?;
                    match number {
                        ValueExpr::Literal(Literal::Number(n)) => {
                            Accessor::Index(n.as_i64().ok_or_else(|| c.error("index must be an integer"))?)
                        }
                        _ => return Err(c.error("expected index")),
                    }
                }
            };
            c.skip_ws();
            c.expect(']')?;
            out.push(accessor);
        } else {
            return Ok(out);
        }
    }
}

/// Comma-separated arguments; the opening paren is already consumed.
pub fn parse_args(c: &mut Cursor) -> Result<Vec<ValueExpr>> {
    let mut args = Vec::new();
    loop {
        c.skip_ws();
        if c.eat(')') {
            return Ok(args);
        }
        args.push(parse_expr(c)?);
        c.skip_ws();
        if !c.eat(',') {
            c.skip_ws();
            c.expect(')')?;
            return Ok(args);
        }
    }
}

fn parse_foreach(c: &mut Cursor) -> Result<ValueExpr> {
    c.skip_spaces();
    c.expect('@')?;
    let mut target = vec![c.ident().ok_or_else(|| c.error("expected executable name"))?];
    while c.peek() == Some('.') {
        c.advance();
        target.push(c.ident().ok_or_else(|| c.error("expected name after '.'"))?);
    }
    c.expect('(')?;
    let arrays = parse_args(c)?;
    Ok(ValueExpr::Foreach(ForeachNode { target, arrays }))
}

// ---------------------------------------------------------------------------
// Templates & commands
// ---------------------------------------------------------------------------

fn template_close(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::DoubleQuote => "\"",
        TemplateKind::Backtick => "`",
        TemplateKind::Colon => "::",
    }
}

/// Parse template parts up to the closing delimiter (already past the
/// opener). Double-quote and backtick templates interpolate `@var`;
/// colon templates interpolate `{{var}}`.
pub fn parse_template(c: &mut Cursor, kind: TemplateKind) -> Result<TemplateNode> {
    let close = template_close(kind);
    let mut parts: Vec<TemplatePart> = Vec::new();
    let mut text = String::new();

    loop {
        if c.starts_with(close) {
            c.eat_str(close);
            break;
        }
        match c.peek() {
            None => return Err(c.error("unterminated template")),
            Some('\\') if kind == TemplateKind::DoubleQuote => {
                c.advance();
                match c.advance() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some(other) => text.push(other),
                    None => return Err(c.error("unterminated template")),
                }
            }
            Some('{') if kind == TemplateKind::Colon && c.starts_with("{{") => {
                c.eat_str("{{");
                c.skip_spaces();
                flush_text(&mut parts, &mut text);
                let start = c.position();
                let name = c.ident().ok_or_else(|| c.error("expected name in {{..}}"))?;
                let accessors = parse_accessors(c)?;
                c.skip_spaces();
                if !c.eat_str("}}") {
                    return Err(c.error("expected '}}'"));
                }
                parts.push(TemplatePart::Var(VarRefNode {
                    name,
                    accessors,
                    span: c.span_from(start),
                }));
            }
            Some('@')
                if kind != TemplateKind::Colon
                    && c.peek_at(1)
                        .map(|ch| ch.is_ascii_alphabetic() || ch == '_')
                        .unwrap_or(false) =>
            {
                c.advance();
                flush_text(&mut parts, &mut text);
                match parse_reference(c)? {
                    ValueExpr::VarRef(node) => parts.push(TemplatePart::Var(node)),
                    ValueExpr::ExecInvocation(node) => parts.push(TemplatePart::Exec(node)),
                    _ => unreachable!(),
                }
            }
            Some(ch) => {
                text.push(ch);
                c.advance();
            }
        }
    }
    flush_text(&mut parts, &mut text);
    if parts.is_empty() {
        parts.push(TemplatePart::Text(String::new()));
    }
    Ok(TemplateNode { kind, parts })
}

fn flush_text(parts: &mut Vec<TemplatePart>, text: &mut String) {
    if !text.is_empty() {
        parts.push(TemplatePart::Text(std::mem::take(text)));
    }
}

/// `[command]` body with `@var` interpolation. Single-quoted regions stay
/// literal; nested brackets are tracked.
pub fn parse_command_body(c: &mut Cursor) -> Result<CommandExpr> {
    let mut parts: Vec<TemplatePart> = Vec::new();
    let mut text = String::new();
    let mut depth = 0usize;
    let mut in_single = false;
    let mut in_double = false;

    loop {
        match c.peek() {
            None => return Err(c.error("unterminated command")),
            Some(']') if depth == 0 && !in_single && !in_double => {
                c.advance();
                break;
            }
            Some('@')
                if !in_single
                    && c.peek_at(1)
                        .map(|ch| ch.is_ascii_alphabetic() || ch == '_')
                        .unwrap_or(false) =>
            {
                c.advance();
                flush_text(&mut parts, &mut text);
                match parse_reference(c)? {
                    ValueExpr::VarRef(node) => parts.push(TemplatePart::Var(node)),
                    ValueExpr::ExecInvocation(node) => parts.push(TemplatePart::Exec(node)),
                    _ => unreachable!(),
                }
            }
            Some(ch) => {
                match ch {
                    '\'' if !in_double => in_single = !in_single,
                    '"' if !in_single => in_double = !in_double,
                    '[' if !in_single && !in_double => depth += 1,
                    ']' if !in_single && !in_double => depth -= 1,
                    _ => {}
                }
                text.push(ch);
                c.advance();
            }
        }
    }
    flush_text(&mut parts, &mut text);
    if parts.is_empty() {
        parts.push(TemplatePart::Text(String::new()));
    }
    Ok(CommandExpr { parts })
}

/// Raw code until the matching `}`. Strings and line comments are skipped
/// so braces inside them do not count.
pub fn parse_code_body(c: &mut Cursor) -> Result<String> {
    let mut out = String::new();
    let mut depth = 0usize;
    loop {
        match c.peek() {
            None => return Err(c.error("unterminated code block")),
            Some('}') if depth == 0 => {
                c.advance();
                return Ok(out.trim().to_string());
            }
            Some('{') => {
                depth += 1;
                out.push('{');
                c.advance();
            }
            Some('}') => {
                depth -= 1;
                out.push('}');
                c.advance();
            }
            Some(q @ ('"' | '\'' | '`')) => {
                out.push(q);
                c.advance();
                loop {
                    match c.advance() {
                        None => return Err(c.error("unterminated string in code block")),
                        Some('\\') => {
                            out.push('\\');
                            if let Some(esc) = c.advance() {
                                out.push(esc);
                            }
                        }
                        Some(ch) => {
                            out.push(ch);
                            if ch == q {
                                break;
                            }
                        }
                    }
                }
            }
            Some('/') if c.peek_at(1) == Some('/') => {
                while let Some(ch) = c.peek() {
                    if ch == '\n' {
                        break;
                    }
                    out.push(ch);
                    c.advance();
                }
            }
            Some('#') => {
                while let Some(ch) = c.peek() {
                    if ch == '\n' {
                        break;
                    }
                    out.push(ch);
                    c.advance();
                }
            }
            Some(ch) => {
                out.push(ch);
                c.advance();
            }
        }
    }
}

fn parse_load_content(c: &mut Cursor) -> Result<ValueExpr> {
    c.expect('<')?;
    let mut raw = String::new();
    loop {
        match c.advance() {
            Some('>') => break,
            Some(ch) => raw.push(ch),
            None => return Err(c.error("unterminated '<path>'")),
        }
    }
    let (path_text, section) = match raw.find('#') {
        Some(idx) => (
            raw[..idx].trim().to_string(),
            Some(raw[idx + 1..].trim().to_string()),
        ),
        None => (raw.trim().to_string(), None),
    };
    Ok(ValueExpr::LoadContent(LoadContentNode {
        path: TemplateNode::literal(TemplateKind::DoubleQuote, path_text),
        section,
    }))
}

// ---------------------------------------------------------------------------
// when / for
// ---------------------------------------------------------------------------

/// `[` clause (newline|,) ... `]`; the `when` keyword is already consumed.
pub fn parse_when_block(c: &mut Cursor) -> Result<WhenExprNode> {
    let start = c.position();
    c.expect('[')?;
    let mut clauses = Vec::new();
    loop {
        c.skip_ws();
        if c.eat(']') {
            return Ok(WhenExprNode {
                clauses,
                span: crate::ast::Span {
                    start,
                    end: c.position(),
                },
            });
        }
        let condition = if c.peek() == Some('*') {
            c.advance();
            WhenCondition::Wildcard
        } else {
            WhenCondition::Expr(parse_expr(c)?)
        };
        c.skip_spaces();
        if !c.eat_str("=>") {
            return Err(c.error("expected '=>' in when clause"));
        }
        c.skip_spaces();
        let action = parse_when_action(c)?;
        clauses.push(WhenClause { condition, action });
        c.skip_spaces();
        c.eat(',');
    }
}

fn clause_terminated(c: &Cursor) -> bool {
    matches!(c.peek(), None | Some('\n') | Some(',') | Some(']'))
}

fn parse_when_action(c: &mut Cursor) -> Result<WhenAction> {
    if c.eat_keyword("allow") {
        return Ok(WhenAction::Allow);
    }
    if c.eat_keyword("deny") {
        c.skip_spaces();
        if clause_terminated(c) {
            return Ok(WhenAction::Deny(None));
        }
        return Ok(WhenAction::Deny(Some(parse_expr(c)?)));
    }
    if c.eat_keyword("retry") {
        c.skip_spaces();
        if clause_terminated(c) {
            return Ok(WhenAction::Retry(None));
        }
        return Ok(WhenAction::Retry(Some(parse_expr(c)?)));
    }
    if c.eat_keyword("show") {
        c.skip_spaces();
        return Ok(WhenAction::Show(parse_expr(c)?));
    }
    Ok(WhenAction::Value(parse_expr(c)?))
}

/// `@x in <iterable> [when <filter>] => body`; `for` is already consumed.
pub fn parse_for_expr(c: &mut Cursor) -> Result<ForExprNode> {
    c.skip_spaces();
    c.expect('@')?;
    let binding = c.ident().ok_or_else(|| c.error("expected loop variable"))?;
    c.skip_spaces();
    if !c.eat_keyword("in") {
        return Err(c.error("expected 'in'"));
    }
    c.skip_spaces();
    let iterable = parse_expr(c)?;
    c.skip_spaces();
    let filter = if c.eat_keyword("when") {
        c.skip_spaces();
        Some(Box::new(parse_expr(c)?))
    } else {
        None
    };
    c.skip_spaces();
    if !c.eat_str("=>") {
        return Err(c.error("expected '=>' in for expression"));
    }
    c.skip_spaces();
    let body = if c.eat_keyword("show") {
        c.skip_spaces();
        ForBody::Show(Box::new(parse_expr(c)?))
    } else {
        ForBody::Value(Box::new(parse_expr(c)?))
    };
    Ok(ForExprNode {
        binding,
        iterable: Box::new(iterable),
        filter,
        body,
    })
}

// ---------------------------------------------------------------------------
// with-clauses & pipelines
// ---------------------------------------------------------------------------

/// `{ pipeline: [...], format: "json", ... }`; `with` is already consumed.
pub fn parse_with_clause(c: &mut Cursor) -> Result<WithClause> {
    c.skip_spaces();
    c.expect('{')?;
    let mut with_clause = WithClause::default();
    loop {
        c.skip_ws();
        if c.eat('}') {
            return Ok(with_clause);
        }
        let key = c.ident().ok_or_else(|| c.error("expected with-clause key"))?;
        c.skip_ws();
        c.expect(':')?;
        c.skip_ws();
        match key.as_str() {
            "pipeline" => with_clause.pipeline = parse_pipeline_stages(c)?,
            "format" => {
                let value = parse_name_or_string(c)?;
                with_clause.format = Some(
                    PipelineFormat::parse(&value)
                        .ok_or_else(|| c.error(format!("unknown format '{}'", value)))?,
                );
            }
            "stdin" => with_clause.stdin = Some(Box::new(parse_expr(c)?)),
            "stream" => {
                with_clause.stream = if c.eat_keyword("true") {
                    true
                } else if c.eat_keyword("false") {
                    false
                } else {
                    return Err(c.error("expected true or false for stream"));
                };
            }
            "trust" => with_clause.trust = Some(parse_name_or_string(c)?),
            "needs" => {
                c.expect('[')?;
                loop {
                    c.skip_ws();
                    if c.eat(']') {
                        break;
                    }
                    with_clause.needs.push(parse_name_or_string(c)?);
                    c.skip_ws();
                    c.eat(',');
                }
            }
            other => return Err(c.error(format!("unknown with-clause key '{}'", other))),
        }
        c.skip_ws();
        c.eat(',');
    }
}

fn parse_name_or_string(c: &mut Cursor) -> Result<String> {
    match c.peek() {
        Some('"') | Some('\'') => parse_string_key(c),
        _ => c.ident().ok_or_else(|| c.error("expected name or string")),
    }
}

/// `[ @stage, [@par1, @par2], @other(arg) ]`
pub fn parse_pipeline_stages(c: &mut Cursor) -> Result<Vec<StageNode>> {
    c.expect('[')?;
    let mut stages = Vec::new();
    loop {
        c.skip_ws();
        if c.eat(']') {
            return Ok(stages);
        }
        if c.peek() == Some('[') {
            c.advance();
            let mut group = Vec::new();
            loop {
                c.skip_ws();
                if c.eat(']') {
                    break;
                }
                group.push(parse_stage_call(c)?);
                c.skip_ws();
                c.eat(',');
            }
            stages.push(StageNode::Parallel(group));
        } else {
            stages.push(StageNode::Single(parse_stage_call(c)?));
        }
        c.skip_ws();
        c.eat(',');
    }
}

pub fn parse_stage_call(c: &mut Cursor) -> Result<StageCallNode> {
    let start = c.position();
    c.expect('@')?;
    let mut target = vec![c.ident().ok_or_else(|| c.error("expected stage name"))?];
    while c.peek() == Some('.')
        && c.peek_at(1)
            .map(|ch| ch.is_ascii_alphabetic() || ch == '_')
            .unwrap_or(false)
    {
        c.advance();
        target.push(c.ident().ok_or_else(|| c.error("expected name after '.'"))?);
    }
    let args = if c.eat('(') { parse_args(c)? } else { Vec::new() };
    Ok(StageCallNode {
        target,
        args,
        span: c.span_from(start),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> ValueExpr {
        let mut c = Cursor::new(source);
        parse_expr(&mut c).unwrap()
    }

    #[test]
    fn test_literals() {
        assert_eq!(expr("'plain'"), ValueExpr::Literal(Literal::Text("plain".into())));
        assert_eq!(expr("42"), ValueExpr::Literal(Literal::Number(42.into())));
        assert_eq!(expr("true"), ValueExpr::Literal(Literal::Bool(true)));
        assert_eq!(expr("null"), ValueExpr::Literal(Literal::Null));
    }

    #[test]
    fn test_double_quote_template_interpolates() {
        match expr(r#""Hello, @name!""#) {
            ValueExpr::Template(t) => {
                assert_eq!(t.kind, TemplateKind::DoubleQuote);
                assert_eq!(t.parts.len(), 3);
                assert!(matches!(&t.parts[1], TemplatePart::Var(v) if v.name == "name"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_backtick_template() {
        match expr("`@a-@b`") {
            ValueExpr::Template(t) => {
                assert_eq!(t.parts.len(), 3);
                assert!(matches!(&t.parts[0], TemplatePart::Var(v) if v.name == "a"));
                assert!(matches!(&t.parts[1], TemplatePart::Text(s) if s == "-"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_colon_template_slots() {
        match expr("::Hi {{user.name}}!::") {
            ValueExpr::Template(t) => {
                assert_eq!(t.kind, TemplateKind::Colon);
                assert!(matches!(&t.parts[1], TemplatePart::Var(v) if v.name == "user"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_object_and_array() {
        match expr(r#"{ name: "x", items: [1, 2] }"#) {
            ValueExpr::Object(entries) => {
                assert_eq!(entries[0].0, "name");
                assert!(matches!(entries[1].1, ValueExpr::Array(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_var_ref_with_accessors() {
        match expr(r#"@s.split(", ")[1].toLowerCase()"#) {
            ValueExpr::VarRef(v) => {
                assert_eq!(v.name, "s");
                assert_eq!(v.accessors.len(), 3);
                assert!(matches!(&v.accessors[0], Accessor::Call { name, .. } if name == "split"));
                assert!(matches!(v.accessors[1], Accessor::Index(1)));
                assert!(
                    matches!(&v.accessors[2], Accessor::Call { name, .. } if name == "toLowerCase")
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invocation_with_args() {
        match expr("@combine(@x, @y)") {
            ValueExpr::ExecInvocation(node) => {
                assert_eq!(node.target, vec!["combine".to_string()]);
                assert_eq!(node.args.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_condition_with_mx_field() {
        match expr(r#"@output != "ok" && @mx.guard.try < 3"#) {
            ValueExpr::Binary(node) => {
                assert_eq!(node.op, BinaryOp::And);
                match *node.rhs {
                    ValueExpr::Binary(cmp) => {
                        assert_eq!(cmp.op, BinaryOp::Lt);
                        match *cmp.lhs {
                            ValueExpr::VarRef(v) => {
                                assert_eq!(v.name, "mx");
                                assert_eq!(v.accessors.len(), 2);
                            }
                            other => panic!("unexpected {:?}", other),
                        }
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_code_form() {
        match expr("js { return 1; }") {
            ValueExpr::Code(code) => {
                assert_eq!(code.language, CodeLanguage::Js);
                assert_eq!(code.source, "return 1;");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_code_body_ignores_braces_in_strings() {
        let mut c = Cursor::new(r#"return "}" + '{'; }"#);
        let body = parse_code_body(&mut c).unwrap();
        assert_eq!(body, r#"return "}" + '{';"#);
    }

    #[test]
    fn test_run_command_form() {
        match expr("run [echo @msg]") {
            ValueExpr::Command(cmd) => {
                assert_eq!(cmd.parts.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_for_expression_nested() {
        match expr("for @x in @l1 => for @y in @l2 => @combine(@x, @y)") {
            ValueExpr::For(outer) => {
                assert_eq!(outer.binding, "x");
                match &outer.body {
                    ForBody::Value(inner) => {
                        assert!(matches!(**inner, ValueExpr::For(_)));
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_when_block() {
        let source = r#"when [
  @x != "ok" => retry "nope"
  * => allow
]"#;
        match expr(source) {
            ValueExpr::When(node) => {
                assert_eq!(node.clauses.len(), 2);
                assert!(matches!(node.clauses[0].action, WhenAction::Retry(Some(_))));
                assert!(matches!(node.clauses[1].condition, WhenCondition::Wildcard));
                assert!(matches!(node.clauses[1].action, WhenAction::Allow));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_with_clause_pipeline() {
        let mut c = Cursor::new(r#"{ pipeline: [@flakyStage, [@a, @b], @fmt("x")], format: "json" }"#);
        let with_clause = parse_with_clause(&mut c).unwrap();
        assert_eq!(with_clause.pipeline.len(), 3);
        assert!(matches!(&with_clause.pipeline[1], StageNode::Parallel(group) if group.len() == 2));
        assert_eq!(with_clause.format, Some(PipelineFormat::Json));
    }

    #[test]
    fn test_load_content_with_section() {
        match expr("<docs/readme.md # Install>") {
            ValueExpr::LoadContent(node) => {
                assert_eq!(node.section.as_deref(), Some("Install"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_foreach() {
        match expr("foreach @combine(@colors, @sizes)") {
            ValueExpr::Foreach(node) => {
                assert_eq!(node.target, vec!["combine".to_string()]);
                assert_eq!(node.arrays.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_and_parens() {
        match expr("!(@flag)") {
            ValueExpr::Not(inner) => assert!(matches!(*inner, ValueExpr::VarRef(_))),
            other => panic!("unexpected {:?}", other),
        }
    }
}
