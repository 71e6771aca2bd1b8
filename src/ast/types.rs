//! Abstract Syntax Tree (AST) Types for mlld
//!
//! This module defines the AST consumed by the evaluator. A document is an
//! ordered sequence of prose nodes (text, newlines) and directive nodes.
//! Expression nodes cover the right-hand sides of directives: templates,
//! literals, variable references with accessor chains, exec invocations,
//! commands, embedded code, and the `when`/`for`/`foreach` forms.

use serde_json::Number;

// =============================================================================
// BASE TYPES
// =============================================================================

/// Position information for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

/// Span in source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn at(line: usize, column: usize) -> Self {
        let pos = Position { line, column, offset: 0 };
        Self { start: pos, end: pos }
    }
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// Root node: a complete parsed document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentNode {
    /// YAML frontmatter body, verbatim, when the document opens with `---`
    pub frontmatter: Option<String>,
    pub nodes: Vec<Node>,
}

/// A top-level document node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal prose, passed through to the output byte-for-byte
    Text(TextNode),
    /// A line break in prose
    Newline,
    /// A `/`-prefixed directive line
    Directive(DirectiveNode),
}

/// Literal text content
#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub content: String,
    pub span: Span,
}

// =============================================================================
// DIRECTIVES
// =============================================================================

/// A directive with its source location
#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveNode {
    pub kind: DirectiveKind,
    pub span: Span,
}

/// Union of all directive forms
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveKind {
    Var(VarDirective),
    Show(ShowDirective),
    Run(RunDirective),
    Exe(ExeDirective),
    Import(ImportDirective),
    When(WhenDirective),
    For(ForDirective),
    Guard(GuardDirective),
}

/// `/var [label..] @name = value [with {..}]`
#[derive(Debug, Clone, PartialEq)]
pub struct VarDirective {
    pub name: String,
    /// Security labels written between `/var` and the name (e.g. `retryable`)
    pub labels: Vec<String>,
    pub value: ValueExpr,
    pub with_clause: Option<WithClause>,
}

/// `/show value`
#[derive(Debug, Clone, PartialEq)]
pub struct ShowDirective {
    pub value: ValueExpr,
}

/// `/run [cmd]` or `/run lang { code }`
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirective {
    pub body: RunBody,
    pub with_clause: Option<WithClause>,
    /// Record a non-zero exit instead of failing the document
    pub continue_on_error: bool,
}

/// The executable payload of a `/run`
#[derive(Debug, Clone, PartialEq)]
pub enum RunBody {
    Command(CommandExpr),
    Code(CodeExpr),
}

/// `/exe @name(params) = body [with {..}]`
#[derive(Debug, Clone, PartialEq)]
pub struct ExeDirective {
    pub name: String,
    pub params: Vec<String>,
    pub body: ExeBody,
    pub with_clause: Option<WithClause>,
}

/// Right-hand side forms of an `/exe` definition
#[derive(Debug, Clone, PartialEq)]
pub enum ExeBody {
    /// `[shell command with @slots]`
    Command(CommandExpr),
    /// `js { ... }`, `python { ... }`, `sh { ... }`
    Code(CodeExpr),
    /// `` `template with @slots` ``
    Template(TemplateNode),
    /// `@other(args)` — alias for another executable
    CommandRef { target: String, args: Vec<ValueExpr> },
    /// `<path # Section>` — markdown section extraction
    Section { path: TemplateNode, section: TemplateNode, rename: Option<TemplateNode> },
    /// `@resolver/path(payload)` — routed through the resolver manager
    Resolver { path: String, payload: Option<Box<ValueExpr>> },
    /// Bare pipeline as a callable
    Pipeline { stages: Vec<StageNode>, format: Option<PipelineFormat> },
    /// Structured data builder evaluated per call
    Data(Box<ValueExpr>),
    /// `when [ ... ]` match block
    When(WhenExprNode),
    /// `for @x in @xs => expr` collecting an array
    For(Box<ForExprNode>),
}

/// Import selection on an `/import` directive
#[derive(Debug, Clone, PartialEq)]
pub enum ImportSelection {
    /// `*` — all user bindings
    All,
    /// `{ name [as alias], .. }`
    Named(Vec<ImportItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportItem {
    pub name: String,
    pub alias: Option<String>,
}

/// `/import <selection> from "path[#Section]"`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDirective {
    pub selection: ImportSelection,
    /// Path or URL template; `#fragment` selects a markdown section
    pub source: TemplateNode,
    pub section: Option<String>,
}

/// `/when [ cond => effect, ... ]` at directive level
#[derive(Debug, Clone, PartialEq)]
pub struct WhenDirective {
    pub expr: WhenExprNode,
}

/// `/for @x in @xs => effect`
#[derive(Debug, Clone, PartialEq)]
pub struct ForDirective {
    pub expr: ForExprNode,
}

/// Guard timing relative to the guarded executable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardTiming {
    Before,
    After,
}

/// What a guard applies to
#[derive(Debug, Clone, PartialEq)]
pub enum GuardTarget {
    /// A specific executable name
    Executable(String),
    /// Every variable/invocation carrying this label
    Label(String),
}

/// `/guard <before|after> @name for <target> = when [ ... ]`
#[derive(Debug, Clone, PartialEq)]
pub struct GuardDirective {
    pub name: String,
    pub timing: GuardTiming,
    pub target: GuardTarget,
    pub body: WhenExprNode,
}

// =============================================================================
// EXPRESSIONS
// =============================================================================

/// Union of all value-producing expression forms
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    /// Primitive literal (single-quoted string, number, bool, null)
    Literal(Literal),
    /// Interpolated template (double-quote, backtick, or colon form)
    Template(TemplateNode),
    /// `{ key: value, .. }`
    Object(Vec<(String, ValueExpr)>),
    /// `[ value, .. ]`
    Array(Vec<ValueExpr>),
    /// `@name.field[0].method(args)`
    VarRef(VarRefNode),
    /// `@fn(args)` followed by optional accessors
    ExecInvocation(ExecInvocationNode),
    /// `[shell command]` evaluated immediately
    Command(CommandExpr),
    /// `lang { code }` evaluated immediately
    Code(CodeExpr),
    /// `<path [# Section]>` file embedding
    LoadContent(LoadContentNode),
    /// `when [ cond => value, ... ]`
    When(WhenExprNode),
    /// `for @x in @xs => expr`
    For(Box<ForExprNode>),
    /// `foreach @fn(@xs, @ys)` cross-product application
    Foreach(ForeachNode),
    /// Unary negation `!expr`
    Not(Box<ValueExpr>),
    /// Binary operator expression
    Binary(BinaryExprNode),
}

/// Primitive literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Single-quoted: no interpolation
    Text(String),
    Number(Number),
    Bool(bool),
    Null,
}

/// Template flavor, controlling delimiter and interpolation syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    DoubleQuote,
    Backtick,
    /// `::...::` templates interpolating `{{var}}` slots
    Colon,
}

/// An interpolated template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateNode {
    pub kind: TemplateKind,
    pub parts: Vec<TemplatePart>,
}

impl TemplateNode {
    /// A template holding a single literal chunk
    pub fn literal(kind: TemplateKind, text: impl Into<String>) -> Self {
        Self { kind, parts: vec![TemplatePart::Text(text.into())] }
    }
}

/// A single chunk of a template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Var(VarRefNode),
    Exec(ExecInvocationNode),
}

/// `@name` with an accessor chain
#[derive(Debug, Clone, PartialEq)]
pub struct VarRefNode {
    pub name: String,
    pub accessors: Vec<Accessor>,
    pub span: Span,
}

impl VarRefNode {
    pub fn bare(name: impl Into<String>) -> Self {
        Self { name: name.into(), accessors: Vec::new(), span: Span::default() }
    }
}

/// One step in an accessor chain
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    /// `.field`
    Field(String),
    /// `[3]` (negative indexes count from the end)
    Index(i64),
    /// `[@expr]` — key computed at evaluation time
    Expr(Box<ValueExpr>),
    /// `.method(args)` — builtin or field-resolved executable call
    Call { name: String, args: Vec<ValueExpr> },
}

/// `@target(args)` invocation with optional trailing accessors/with-clause
#[derive(Debug, Clone, PartialEq)]
pub struct ExecInvocationNode {
    /// Dotted target path (`a` or `a.b`)
    pub target: Vec<String>,
    pub args: Vec<ValueExpr>,
    pub accessors: Vec<Accessor>,
    pub with_clause: Option<WithClause>,
    pub span: Span,
}

/// `[shell command with @slots]`
#[derive(Debug, Clone, PartialEq)]
pub struct CommandExpr {
    pub parts: Vec<TemplatePart>,
}

/// `lang { source }`
#[derive(Debug, Clone, PartialEq)]
pub struct CodeExpr {
    pub language: CodeLanguage,
    pub source: String,
}

/// Language tag on embedded code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLanguage {
    Js,
    Node,
    Python,
    Bash,
    Sh,
}

impl CodeLanguage {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "js" => Some(Self::Js),
            "node" => Some(Self::Node),
            "python" | "py" => Some(Self::Python),
            "bash" => Some(Self::Bash),
            "sh" => Some(Self::Sh),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Node => "node",
            Self::Python => "python",
            Self::Bash => "bash",
            Self::Sh => "sh",
        }
    }
}

/// `<path [# Section]>` content embedding
#[derive(Debug, Clone, PartialEq)]
pub struct LoadContentNode {
    pub path: TemplateNode,
    pub section: Option<String>,
}

/// `when [ condition => action, ... ]`
#[derive(Debug, Clone, PartialEq)]
pub struct WhenExprNode {
    pub clauses: Vec<WhenClause>,
    pub span: Span,
}

/// One `condition => action` arm
#[derive(Debug, Clone, PartialEq)]
pub struct WhenClause {
    pub condition: WhenCondition,
    pub action: WhenAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WhenCondition {
    /// `*` — always matches
    Wildcard,
    Expr(ValueExpr),
}

/// The consequent of a matched `when` arm
#[derive(Debug, Clone, PartialEq)]
pub enum WhenAction {
    /// Produce a value (expression position) or show it (directive position)
    Value(ValueExpr),
    /// `show expr` side effect
    Show(ValueExpr),
    /// Guard decision: continue
    Allow,
    /// Guard decision: reject with reason
    Deny(Option<ValueExpr>),
    /// Guard decision: re-run with reason
    Retry(Option<ValueExpr>),
}

/// `for @binding in @iterable => body`
#[derive(Debug, Clone, PartialEq)]
pub struct ForExprNode {
    pub binding: String,
    pub iterable: Box<ValueExpr>,
    /// Optional inline filter: `for @x in @xs when @x != null => ..`
    pub filter: Option<Box<ValueExpr>>,
    pub body: ForBody,
}

/// What a `for` does with each element
#[derive(Debug, Clone, PartialEq)]
pub enum ForBody {
    /// Collect the expression's value per element into an array
    Value(Box<ValueExpr>),
    /// Append each element's rendering to the document
    Show(Box<ValueExpr>),
}

/// `foreach @fn(@xs, @ys, ..)` — applies `fn` over the cross product
#[derive(Debug, Clone, PartialEq)]
pub struct ForeachNode {
    pub target: Vec<String>,
    pub arrays: Vec<ValueExpr>,
}

/// Binary operators usable in conditions and data expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExprNode {
    pub op: BinaryOp,
    pub lhs: Box<ValueExpr>,
    pub rhs: Box<ValueExpr>,
}

// =============================================================================
// WITH-CLAUSES & PIPELINES
// =============================================================================

/// Output format coercion at pipeline entry/exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFormat {
    Text,
    Json,
    Array,
}

impl PipelineFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            "array" => Some(Self::Array),
            _ => None,
        }
    }
}

/// Trailing options on a value or invocation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WithClause {
    pub pipeline: Vec<StageNode>,
    pub format: Option<PipelineFormat>,
    pub stdin: Option<Box<ValueExpr>>,
    pub stream: bool,
    pub trust: Option<String>,
    pub needs: Vec<String>,
}

impl WithClause {
    pub fn is_empty(&self) -> bool {
        self.pipeline.is_empty()
            && self.format.is_none()
            && self.stdin.is_none()
            && !self.stream
            && self.trust.is_none()
            && self.needs.is_empty()
    }
}

/// One pipeline stage: a single call or a parallel fan-out group
#[derive(Debug, Clone, PartialEq)]
pub enum StageNode {
    Single(StageCallNode),
    Parallel(Vec<StageCallNode>),
}

/// A stage call: `@name` or `@name(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct StageCallNode {
    pub target: Vec<String>,
    pub args: Vec<ValueExpr>,
    pub span: Span,
}

impl StageCallNode {
    pub fn named(name: impl Into<String>) -> Self {
        Self { target: vec![name.into()], args: Vec::new(), span: Span::default() }
    }
}
