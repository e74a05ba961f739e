// ast.rs — AST for pipeline declaration files (.psig)
//
// One node per declaration line. Every node carries a `SimpleSpan` so the
// materializer can point diagnostics at the offending text.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;
use chumsky::span::Span as _;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// Smallest span covering both `a` and `b`.
pub fn join(a: Span, b: Span) -> Span {
    Span::new((), a.start.min(b.start)..a.end.max(b.end))
}

/// A whole declaration file.
#[derive(Debug, Clone, PartialEq)]
pub struct Declarations {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// `pipeline <name>`
    Pipeline(Ident),
    /// `input <name> : <type>[<dims>]`
    Input(ImageDecl),
    /// `output <name> : <type>[<dims>]`
    Output(ImageDecl),
    /// `param <name> : <type> [in [lo, hi]]`
    Param(ParamDecl),
    /// `constrain <image>.<field>.<d> = <expr>`
    Constrain(ConstrainDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageDecl {
    pub name: Ident,
    pub ty: Ident,
    /// Omitted brackets declare a zero-dimensional image.
    pub dims: Option<(u64, Span)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: Ident,
    pub ty: Ident,
    pub range: Option<(Expr, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstrainDecl {
    pub target: BoundRef,
    pub value: Expr,
}

/// `<image>.<min|extent|stride>.<d>`
#[derive(Debug, Clone, PartialEq)]
pub struct BoundRef {
    pub image: Ident,
    pub field: Ident,
    pub dim: (u64, Span),
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(u64, Span),
    Float(f64, Span),
    Name(Ident),
    Bound(BoundRef),
    Neg(Box<Expr>, Span),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    /// Casts and `min`/`max` share call syntax; the materializer tells
    /// them apart by callee name.
    Call {
        callee: Ident,
        args: Vec<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int(_, s) | Expr::Float(_, s) | Expr::Neg(_, s) => *s,
            Expr::Name(id) => id.span,
            Expr::Bound(b) => b.span,
            Expr::Binary { span, .. } | Expr::Call { span, .. } => *span,
        }
    }
}
