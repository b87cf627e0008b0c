#![forbid(unsafe_code)]

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

pub fn span_start(s: Span) -> usize {
    s.offset()
}

pub fn span_end(s: Span) -> usize {
    s.offset() + s.len()
}

/// Smallest span covering both `a` and `b`.
pub fn join(a: Span, b: Span) -> Span {
    let start = span_start(a).min(span_start(b));
    let end = span_end(a).max(span_end(b));
    span_between(start, end)
}

pub type Ident = Spanned<String>;

/// Stack left before a tree walker grows onto a fresh segment.
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

/// Runs `f`, first growing the stack if little is left.
///
/// Every recursive entry point over the tree (parser, scope builder, checker)
/// goes through here so that deeply nested or very long chained expressions
/// cannot overflow the thread's stack.
pub fn ensure_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, f)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub span: Span,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign(AssignStmt),
    AnnAssign(AnnAssignStmt),
    AugAssign(AugAssignStmt),
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Return(ReturnStmt),
    Pass(Span),
    Break(Span),
    Continue(Span),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    Import(ImportStmt),
    ImportFrom(ImportFromStmt),
    Raise(RaiseStmt),
    Assert(AssertStmt),
    Try(TryStmt),
    With(WithStmt),
    Delete(DeleteStmt),
    Global(NameListStmt),
    Nonlocal(NameListStmt),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr(e) => e.span,
            Stmt::Assign(s) => s.span,
            Stmt::AnnAssign(s) => s.span,
            Stmt::AugAssign(s) => s.span,
            Stmt::FunctionDef(s) => s.span,
            Stmt::ClassDef(s) => s.span,
            Stmt::Return(s) => s.span,
            Stmt::Pass(s) | Stmt::Break(s) | Stmt::Continue(s) => *s,
            Stmt::If(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::For(s) => s.span,
            Stmt::Import(s) => s.span,
            Stmt::ImportFrom(s) => s.span,
            Stmt::Raise(s) => s.span,
            Stmt::Assert(s) => s.span,
            Stmt::Try(s) => s.span,
            Stmt::With(s) => s.span,
            Stmt::Delete(s) => s.span,
            Stmt::Global(s) | Stmt::Nonlocal(s) => s.span,
        }
    }
}

/// `a = b = value`; one entry in `targets` per `=`.
#[derive(Clone, Debug, PartialEq)]
pub struct AssignStmt {
    pub span: Span,
    pub targets: Vec<Expr>,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnnAssignStmt {
    pub span: Span,
    pub target: Expr,
    pub annotation: Expr,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AugAssignStmt {
    pub span: Span,
    pub target: Expr,
    pub op: BinOp,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub span: Span,
    pub name: Ident,
    pub decorators: Vec<Expr>,
    pub params: Vec<Param>,
    pub returns: Option<Expr>,
    pub body: Block,
    pub is_async: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    PositionalOnly,
    Regular,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub span: Span,
    pub name: Ident,
    pub kind: ParamKind,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassDef {
    pub span: Span,
    pub name: Ident,
    pub decorators: Vec<Expr>,
    pub bases: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Keyword {
    pub span: Span,
    pub name: Ident,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub span: Span,
    pub value: Option<Expr>,
}

/// `elif` chains are nested `IfStmt`s in `orelse`.
#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub span: Span,
    pub test: Expr,
    pub body: Block,
    pub orelse: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub span: Span,
    pub test: Expr,
    pub body: Block,
    pub orelse: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForStmt {
    pub span: Span,
    pub target: Expr,
    pub iter: Expr,
    pub body: Block,
    pub orelse: Option<Block>,
    pub is_async: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Alias {
    pub span: Span,
    /// Dotted name as written, e.g. `os.path`.
    pub name: Ident,
    pub asname: Option<Ident>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportStmt {
    pub span: Span,
    pub names: Vec<Alias>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportFromStmt {
    pub span: Span,
    pub module: Option<Ident>,
    /// Number of leading dots.
    pub level: u32,
    pub names: Vec<Alias>,
    /// `from m import *`
    pub star: Option<Span>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RaiseStmt {
    pub span: Span,
    pub exc: Option<Expr>,
    pub cause: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssertStmt {
    pub span: Span,
    pub test: Expr,
    pub msg: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TryStmt {
    pub span: Span,
    pub body: Block,
    pub handlers: Vec<ExceptHandler>,
    pub orelse: Option<Block>,
    pub finalbody: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExceptHandler {
    pub span: Span,
    pub ty: Option<Expr>,
    pub name: Option<Ident>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WithStmt {
    pub span: Span,
    pub items: Vec<WithItem>,
    pub body: Block,
    pub is_async: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WithItem {
    pub span: Span,
    pub context: Expr,
    pub target: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeleteStmt {
    pub span: Span,
    pub targets: Vec<Expr>,
}

/// `global a, b` / `nonlocal a, b`
#[derive(Clone, Debug, PartialEq)]
pub struct NameListStmt {
    pub span: Span,
    pub names: Vec<Ident>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Name(String),
    /// Saturates at `u64::MAX`; only small values matter to the checker.
    IntLit(u64),
    FloatLit(f64),
    ImagLit,
    /// Contents without prefix and quotes; escapes are left as written.
    StrLit(String),
    BytesLit(String),
    /// f-string with its replacement-field expressions in source order.
    FStringLit(Vec<Expr>),
    BoolLit(bool),
    NoneLit,
    Ellipsis,
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// `a and b and c`
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    /// `a < b <= c` keeps every link.
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<CallArg>,
    },
    Attribute {
        value: Box<Expr>,
        attr: Ident,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<DictItem>),
    Starred(Box<Expr>),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    Comp {
        kind: CompKind,
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    /// `(name := value)`
    Named {
        target: Ident,
        value: Box<Expr>,
    },
    Await(Box<Expr>),
    Yield(Option<Box<Expr>>),
    YieldFrom(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum DictItem {
    Pair(Expr, Expr),
    /// `**mapping`
    Spread(Expr),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompKind {
    List,
    Set,
    Generator,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Comprehension {
    pub span: Span,
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
    pub is_async: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallArg {
    Positional(Expr),
    Keyword { name: Ident, value: Expr },
    Star(Expr),
    DoubleStar(Expr),
}

impl CallArg {
    pub fn span(&self) -> Span {
        match self {
            CallArg::Positional(e) | CallArg::Star(e) | CallArg::DoubleStar(e) => e.span,
            CallArg::Keyword { name, value } => join(name.span, value.span),
        }
    }

    pub fn value(&self) -> &Expr {
        match self {
            CallArg::Positional(e) | CallArg::Star(e) | CallArg::DoubleStar(e) => e,
            CallArg::Keyword { value, .. } => value,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::MatMul => "@",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_covers_both_spans_in_any_order() {
        let a = span(4, 3);
        let b = span(10, 2);
        assert_eq!(join(a, b), span_between(4, 12));
        assert_eq!(join(b, a), span_between(4, 12));
    }

    #[test]
    fn call_arg_span_includes_keyword_name() {
        let arg = CallArg::Keyword {
            name: Spanned::new(span(0, 3), "key".to_string()),
            value: Expr {
                span: span(4, 1),
                kind: ExprKind::IntLit(1),
            },
        };
        assert_eq!(arg.span(), span_between(0, 5));
    }
}
