//! AST node vocabulary consumed by the engine.
//!
//! The surface grammar lives outside the core; a parser (or a host embedding
//! the runtime) produces these nodes. Reference nodes carry a resolve slot
//! that module preparation fills in, making every runtime lookup a pointer
//! chase.

use std::{cell::OnceCell, rc::Rc};

use bigdecimal::BigDecimal;

use crate::{
    engine::ScopeName,
    handle::HandleKind,
    module::FunctionDefinition,
    morph::{MaskMode, MorphMode},
    shape::ShapeDefinition,
    tag::TagDefinition,
};

/// Source position metadata for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub file: Option<Rc<str>>,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// An expression node.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Option<Span>,
}

impl Node {
    #[must_use]
    pub fn new(kind: NodeKind) -> Rc<Self> {
        Rc::new(Self { kind, span: None })
    }

    #[must_use]
    pub fn with_span(kind: NodeKind, span: Span) -> Rc<Self> {
        Rc::new(Self { kind, span: Some(span) })
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ArithOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Rem,
    #[strum(serialize = "**")]
    Pow,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CompareOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
}

/// Short-circuiting boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BoolOp {
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
}

/// Unary operators. `!!` is boolean negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UnaryOp {
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "!!")]
    Not,
}

/// Expression node kinds.
#[derive(Debug)]
pub enum NodeKind {
    Number(BigDecimal),
    String(String),
    /// A field-access chain; the first segment resolves the base per the
    /// scope rules, the rest descend.
    Identifier(Vec<FieldSeg>),
    Arithmetic {
        op: ArithOp,
        left: Rc<Node>,
        right: Rc<Node>,
    },
    Comparison {
        op: CompareOp,
        left: Rc<Node>,
        right: Rc<Node>,
    },
    Boolean {
        op: BoolOp,
        left: Rc<Node>,
        right: Rc<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Rc<Node>,
    },
    /// `left ?? right`: evaluate `left` accepting failures; a failure is
    /// replaced by `right`'s value.
    Fallback {
        left: Rc<Node>,
        right: Rc<Node>,
    },
    Morph {
        expr: Rc<Node>,
        shape: Rc<ShapeRefNode>,
        mode: MorphMode,
    },
    Mask {
        expr: Rc<Node>,
        shape: Rc<ShapeRefNode>,
        mode: MaskMode,
    },
    /// Structure literal: field ops evaluated in order.
    Structure(Vec<FieldOpNode>),
    Pipeline {
        seed: Option<Rc<Node>>,
        ops: Vec<PipeOp>,
    },
    /// Deferred body; evaluating yields a block value capturing the current
    /// scopes.
    Block(Rc<Node>),
    /// `#tag` as a value.
    TagValue(Rc<TagRefNode>),
    /// `!grab @kind`.
    Grab(Rc<HandleRefNode>),
    /// `!drop expr`.
    Drop(Rc<Node>),
    /// `???` — evaluating is a runtime failure.
    Placeholder,
}

impl NodeKind {
    /// Stable node-kind label for tracing.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Identifier(_) => "identifier",
            Self::Arithmetic { .. } => "arithmetic",
            Self::Comparison { .. } => "comparison",
            Self::Boolean { .. } => "boolean",
            Self::Unary { .. } => "unary",
            Self::Fallback { .. } => "fallback",
            Self::Morph { .. } => "morph",
            Self::Mask { .. } => "mask",
            Self::Structure(_) => "structure",
            Self::Pipeline { .. } => "pipeline",
            Self::Block(_) => "block",
            Self::TagValue(_) => "tag",
            Self::Grab(_) => "grab",
            Self::Drop(_) => "drop",
            Self::Placeholder => "placeholder",
        }
    }
}

/// One segment of a field-access chain or assignment key.
#[derive(Debug)]
pub enum FieldSeg {
    /// Bare token: `a` in `a.b`.
    Token(String),
    /// Quoted field name: `'weird name'`.
    Text(String),
    /// Positional selection: `#2` or `#(expr)`.
    Index(IndexSeg),
    /// Computed key: `.(expr)`; the expression must evaluate to a text or
    /// tag key.
    Compute(Rc<Node>),
    /// Scope root: `$in`, `$var`, `^`, …
    Scope(ScopeName),
}

#[derive(Debug)]
pub enum IndexSeg {
    Literal(usize),
    Computed(Rc<Node>),
}

/// One operation inside a structure literal.
#[derive(Debug)]
pub enum FieldOpNode {
    /// `key = value`, `value` (unnamed), or a deep/scope assignment when the
    /// key has multiple segments or a scope head.
    Field {
        key: Option<Vec<FieldSeg>>,
        value: Rc<Node>,
    },
    /// `..expr` — inline the fields of a structure.
    Spread(Rc<Node>),
}

/// One stage of a pipeline.
#[derive(Debug)]
pub enum PipeOp {
    /// `|name` or `|name ^{args}` — function invocation.
    Func(PipeFuncNode),
    /// `|{…}` — merge a structure literal over the pipeline value.
    Struct(Rc<Node>),
    /// `|:block` — apply a captured block.
    Block(Rc<Node>),
    /// `|? expr` — replace a failure with `expr`, pass success through.
    Fallback(Rc<Node>),
}

#[derive(Debug)]
pub struct PipeFuncNode {
    pub func: Rc<FuncRefNode>,
    pub args: Option<Rc<Node>>,
}

/// Reference to a tag definition: leaf-first partial path plus optional
/// namespace, resolved during preparation.
#[derive(Debug)]
pub struct TagRefNode {
    pub path: Vec<String>,
    pub namespace: Option<String>,
    resolved: OnceCell<Rc<TagDefinition>>,
}

impl TagRefNode {
    #[must_use]
    pub fn new(path: Vec<String>, namespace: Option<String>) -> Rc<Self> {
        Rc::new(Self {
            path,
            namespace,
            resolved: OnceCell::new(),
        })
    }

    pub fn resolved(&self) -> Option<&Rc<TagDefinition>> {
        self.resolved.get()
    }

    pub(crate) fn resolve(&self, definition: Rc<TagDefinition>) {
        let _ = self.resolved.set(definition);
    }

    #[must_use]
    pub fn display_path(&self) -> String {
        self.path.join(".")
    }
}

/// How a function reference names its module.
#[derive(Debug)]
pub enum FuncNamespace {
    /// Local module (and visible namespaces).
    Local,
    /// `|name/ns` — a specific namespace.
    Static(String),
    /// `|name/(expr)` — the expression's tag or handle selects the module
    /// at run time.
    Dynamic(Rc<Node>),
}

/// Reference to a function's overload set.
#[derive(Debug)]
pub struct FuncRefNode {
    pub path: Vec<String>,
    pub namespace: FuncNamespace,
    resolved: OnceCell<Rc<Vec<Rc<FunctionDefinition>>>>,
}

impl FuncRefNode {
    #[must_use]
    pub fn new(path: Vec<String>, namespace: FuncNamespace) -> Rc<Self> {
        Rc::new(Self {
            path,
            namespace,
            resolved: OnceCell::new(),
        })
    }

    pub fn resolved(&self) -> Option<&Rc<Vec<Rc<FunctionDefinition>>>> {
        self.resolved.get()
    }

    pub(crate) fn resolve(&self, overloads: Rc<Vec<Rc<FunctionDefinition>>>) {
        let _ = self.resolved.set(overloads);
    }

    #[must_use]
    pub fn display_path(&self) -> String {
        self.path.join(".")
    }
}

/// Reference to a handle kind.
#[derive(Debug)]
pub struct HandleRefNode {
    pub path: Vec<String>,
    pub namespace: Option<String>,
    resolved: OnceCell<Rc<HandleKind>>,
}

impl HandleRefNode {
    #[must_use]
    pub fn new(path: Vec<String>, namespace: Option<String>) -> Rc<Self> {
        Rc::new(Self {
            path,
            namespace,
            resolved: OnceCell::new(),
        })
    }

    pub fn resolved(&self) -> Option<&Rc<HandleKind>> {
        self.resolved.get()
    }

    pub(crate) fn resolve(&self, kind: Rc<HandleKind>) {
        let _ = self.resolved.set(kind);
    }

    #[must_use]
    pub fn display_path(&self) -> String {
        self.path.join(".")
    }
}

/// A shape reference: named, inline literal, or union.
///
/// Inline and union forms materialize an anonymous shape definition during
/// preparation; all three resolve to a `ShapeDefinition`.
#[derive(Debug)]
pub enum ShapeRefNode {
    Named {
        path: Vec<String>,
        namespace: Option<String>,
        resolved: OnceCell<Rc<ShapeDefinition>>,
    },
    Inline {
        fields: Vec<ShapeFieldDecl>,
        resolved: OnceCell<Rc<ShapeDefinition>>,
    },
    Union {
        members: Vec<Rc<ShapeRefNode>>,
        resolved: OnceCell<Rc<ShapeDefinition>>,
    },
}

impl ShapeRefNode {
    #[must_use]
    pub fn named(path: Vec<String>, namespace: Option<String>) -> Rc<Self> {
        Rc::new(Self::Named {
            path,
            namespace,
            resolved: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn inline(fields: Vec<ShapeFieldDecl>) -> Rc<Self> {
        Rc::new(Self::Inline {
            fields,
            resolved: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn union(members: Vec<Rc<ShapeRefNode>>) -> Rc<Self> {
        Rc::new(Self::Union {
            members,
            resolved: OnceCell::new(),
        })
    }

    pub fn resolved(&self) -> Option<&Rc<ShapeDefinition>> {
        match self {
            Self::Named { resolved, .. } | Self::Inline { resolved, .. } | Self::Union { resolved, .. } => {
                resolved.get()
            }
        }
    }

    pub(crate) fn resolve(&self, definition: Rc<ShapeDefinition>) {
        let cell = match self {
            Self::Named { resolved, .. } | Self::Inline { resolved, .. } | Self::Union { resolved, .. } => resolved,
        };
        let _ = cell.set(definition);
    }

    #[must_use]
    pub fn display_path(&self) -> String {
        match self {
            Self::Named { path, .. } => path.join("."),
            Self::Inline { .. } => "{…}".to_owned(),
            Self::Union { .. } => "|…|".to_owned(),
        }
    }
}

/// Type constraint written on a shape field.
#[derive(Debug)]
pub enum TypeRef {
    Shape(Rc<ShapeRefNode>),
    Tag(Rc<TagRefNode>),
    Handle(Rc<HandleRefNode>),
}

/// One field of a shape declaration.
///
/// Spread fields (`..~other`) exist only in the AST; preparation expands
/// them into the referenced shape's fields.
#[derive(Debug)]
pub struct ShapeFieldDecl {
    pub name: Option<String>,
    pub constraint: Option<TypeRef>,
    pub default: Option<Rc<Node>>,
    pub is_spread: bool,
    pub is_array: bool,
    pub array_min: Option<usize>,
    pub array_max: Option<usize>,
}

impl ShapeFieldDecl {
    /// A plain field with an optional name and constraint.
    #[must_use]
    pub fn new(name: Option<&str>, constraint: Option<TypeRef>) -> Self {
        Self {
            name: name.map(ToOwned::to_owned),
            constraint,
            default: None,
            is_spread: false,
            is_array: false,
            array_min: None,
            array_max: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Rc<Node>) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn spread(shape: Rc<ShapeRefNode>) -> Self {
        Self {
            name: None,
            constraint: Some(TypeRef::Shape(shape)),
            default: None,
            is_spread: true,
            is_array: false,
            array_min: None,
            array_max: None,
        }
    }
}

/// Top-level module declarations.
#[derive(Debug)]
pub struct ModuleAst {
    pub statements: Vec<Decl>,
}

#[derive(Debug)]
pub enum Decl {
    Tag(TagDecl),
    Shape(ShapeDecl),
    Func(FuncDecl),
    Handle(HandleDecl),
    Import(ImportDecl),
}

/// `!tag #status = {…}` with nested children.
#[derive(Debug)]
pub struct TagDecl {
    /// Definition-order path, root first.
    pub path: Vec<String>,
    pub value: Option<Rc<Node>>,
    pub children: Vec<TagDecl>,
    /// Cross-module parent declared with an extends clause.
    pub extends: Option<Rc<TagRefNode>>,
}

impl TagDecl {
    #[must_use]
    pub fn new(path: &[&str]) -> Self {
        Self {
            path: path.iter().map(|s| (*s).to_owned()).collect(),
            value: None,
            children: Vec::new(),
            extends: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: Rc<Node>) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<TagDecl>) -> Self {
        self.children = children;
        self
    }
}

/// `!shape ~name = {…}` or `!shape ~name = ~a | ~b`.
#[derive(Debug)]
pub struct ShapeDecl {
    pub path: Vec<String>,
    pub body: ShapeBody,
}

#[derive(Debug)]
pub enum ShapeBody {
    Fields(Vec<ShapeFieldDecl>),
    Union(Vec<Rc<ShapeRefNode>>),
}

/// `!func |name ~input ^args = body`.
#[derive(Debug)]
pub struct FuncDecl {
    pub path: Vec<String>,
    pub input_shape: Option<Rc<ShapeRefNode>>,
    pub arg_shape: Option<Rc<ShapeRefNode>>,
    pub body: Rc<Node>,
    pub mode: MorphMode,
    pub is_pure: bool,
    pub doc: Option<String>,
}

impl FuncDecl {
    #[must_use]
    pub fn new(path: &[&str], body: Rc<Node>) -> Self {
        Self {
            path: path.iter().map(|s| (*s).to_owned()).collect(),
            input_shape: None,
            arg_shape: None,
            body,
            mode: MorphMode::Normal,
            is_pure: false,
            doc: None,
        }
    }

    #[must_use]
    pub fn with_input_shape(mut self, shape: Rc<ShapeRefNode>) -> Self {
        self.input_shape = Some(shape);
        self
    }

    #[must_use]
    pub fn with_arg_shape(mut self, shape: Rc<ShapeRefNode>) -> Self {
        self.arg_shape = Some(shape);
        self
    }
}

/// `!handle @kind = { drop-block }`.
#[derive(Debug)]
pub struct HandleDecl {
    pub path: Vec<String>,
    pub drop_block: Option<Rc<Node>>,
}

/// `!import ns = source` — resolved against the host's module registry.
#[derive(Debug)]
pub struct ImportDecl {
    pub namespace: String,
    pub source: String,
}

// --- Construction helpers -------------------------------------------------
//
// The parser is the primary producer of nodes; these shorthands keep hosts
// and tests readable.

impl Node {
    #[must_use]
    pub fn number(n: i64) -> Rc<Self> {
        Self::new(NodeKind::Number(BigDecimal::from(n)))
    }

    /// Numeric literal from its decimal spelling.
    ///
    /// # Panics
    /// Panics when the literal does not parse; callers pass known-good
    /// spellings.
    #[must_use]
    pub fn decimal(literal: &str) -> Rc<Self> {
        Self::new(NodeKind::Number(literal.parse().expect("decimal literal")))
    }

    #[must_use]
    pub fn text(s: &str) -> Rc<Self> {
        Self::new(NodeKind::String(s.to_owned()))
    }

    /// Unprefixed identifier chain of bare tokens.
    #[must_use]
    pub fn ident(path: &[&str]) -> Rc<Self> {
        Self::new(NodeKind::Identifier(
            path.iter().map(|p| FieldSeg::Token((*p).to_owned())).collect(),
        ))
    }

    /// Scope-rooted identifier, e.g. `$var.h`.
    #[must_use]
    pub fn scoped(scope: ScopeName, path: &[&str]) -> Rc<Self> {
        let mut segs = vec![FieldSeg::Scope(scope)];
        segs.extend(path.iter().map(|p| FieldSeg::Token((*p).to_owned())));
        Self::new(NodeKind::Identifier(segs))
    }

    #[must_use]
    pub fn arithmetic(op: ArithOp, left: Rc<Node>, right: Rc<Node>) -> Rc<Self> {
        Self::new(NodeKind::Arithmetic { op, left, right })
    }

    #[must_use]
    pub fn comparison(op: CompareOp, left: Rc<Node>, right: Rc<Node>) -> Rc<Self> {
        Self::new(NodeKind::Comparison { op, left, right })
    }

    #[must_use]
    pub fn boolean(op: BoolOp, left: Rc<Node>, right: Rc<Node>) -> Rc<Self> {
        Self::new(NodeKind::Boolean { op, left, right })
    }

    #[must_use]
    pub fn unary(op: UnaryOp, operand: Rc<Node>) -> Rc<Self> {
        Self::new(NodeKind::Unary { op, operand })
    }

    #[must_use]
    pub fn fallback(left: Rc<Node>, right: Rc<Node>) -> Rc<Self> {
        Self::new(NodeKind::Fallback { left, right })
    }

    #[must_use]
    pub fn morph(expr: Rc<Node>, shape: Rc<ShapeRefNode>, mode: MorphMode) -> Rc<Self> {
        Self::new(NodeKind::Morph { expr, shape, mode })
    }

    #[must_use]
    pub fn mask(expr: Rc<Node>, shape: Rc<ShapeRefNode>, mode: MaskMode) -> Rc<Self> {
        Self::new(NodeKind::Mask { expr, shape, mode })
    }

    #[must_use]
    pub fn structure(ops: Vec<FieldOpNode>) -> Rc<Self> {
        Self::new(NodeKind::Structure(ops))
    }

    #[must_use]
    pub fn pipeline(seed: Option<Rc<Node>>, ops: Vec<PipeOp>) -> Rc<Self> {
        Self::new(NodeKind::Pipeline { seed, ops })
    }

    #[must_use]
    pub fn block(body: Rc<Node>) -> Rc<Self> {
        Self::new(NodeKind::Block(body))
    }

    /// `#leaf.parent` tag value reference (leaf-first path).
    #[must_use]
    pub fn tag_ref(path: &[&str]) -> Rc<Self> {
        Self::new(NodeKind::TagValue(TagRefNode::new(
            path.iter().map(|s| (*s).to_owned()).collect(),
            None,
        )))
    }

    #[must_use]
    pub fn tag_ref_in(path: &[&str], namespace: &str) -> Rc<Self> {
        Self::new(NodeKind::TagValue(TagRefNode::new(
            path.iter().map(|s| (*s).to_owned()).collect(),
            Some(namespace.to_owned()),
        )))
    }

    #[must_use]
    pub fn grab(path: &[&str]) -> Rc<Self> {
        Self::new(NodeKind::Grab(HandleRefNode::new(
            path.iter().map(|s| (*s).to_owned()).collect(),
            None,
        )))
    }

    #[must_use]
    pub fn drop_handle(expr: Rc<Node>) -> Rc<Self> {
        Self::new(NodeKind::Drop(expr))
    }

    #[must_use]
    pub fn placeholder() -> Rc<Self> {
        Self::new(NodeKind::Placeholder)
    }
}

impl FieldOpNode {
    /// Named field op: `name = value`.
    #[must_use]
    pub fn named(name: &str, value: Rc<Node>) -> Self {
        Self::Field {
            key: Some(vec![FieldSeg::Token(name.to_owned())]),
            value,
        }
    }

    /// Positional field op.
    #[must_use]
    pub fn positional(value: Rc<Node>) -> Self {
        Self::Field { key: None, value }
    }

    /// Deep or scope-rooted assignment: `one.two = value`, `$var.x = value`.
    #[must_use]
    pub fn path(key: Vec<FieldSeg>, value: Rc<Node>) -> Self {
        Self::Field { key: Some(key), value }
    }

    #[must_use]
    pub fn spread(expr: Rc<Node>) -> Self {
        Self::Spread(expr)
    }
}

impl PipeOp {
    /// `|name` with no arguments.
    #[must_use]
    pub fn func(name: &[&str]) -> Self {
        Self::Func(PipeFuncNode {
            func: FuncRefNode::new(
                name.iter().map(|s| (*s).to_owned()).collect(),
                FuncNamespace::Local,
            ),
            args: None,
        })
    }

    /// `|name ^{args}`.
    #[must_use]
    pub fn func_with_args(name: &[&str], args: Rc<Node>) -> Self {
        Self::Func(PipeFuncNode {
            func: FuncRefNode::new(
                name.iter().map(|s| (*s).to_owned()).collect(),
                FuncNamespace::Local,
            ),
            args: Some(args),
        })
    }

    /// `|name/ns`.
    #[must_use]
    pub fn func_in(name: &[&str], namespace: &str) -> Self {
        Self::Func(PipeFuncNode {
            func: FuncRefNode::new(
                name.iter().map(|s| (*s).to_owned()).collect(),
                FuncNamespace::Static(namespace.to_owned()),
            ),
            args: None,
        })
    }

    /// `|name/(expr)` — dynamic namespace dispatch.
    #[must_use]
    pub fn func_dynamic(name: &[&str], selector: Rc<Node>) -> Self {
        Self::Func(PipeFuncNode {
            func: FuncRefNode::new(
                name.iter().map(|s| (*s).to_owned()).collect(),
                FuncNamespace::Dynamic(selector),
            ),
            args: None,
        })
    }
}
