#![forbid(unsafe_code)]

use std::fmt;

use typy_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrKind {
    Plain,
    Bytes,
    Format,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwFalse,
    KwNone,
    KwTrue,
    KwAnd,
    KwAs,
    KwAssert,
    KwAsync,
    KwAwait,
    KwBreak,
    KwClass,
    KwContinue,
    KwDef,
    KwDel,
    KwElif,
    KwElse,
    KwExcept,
    KwFinally,
    KwFor,
    KwFrom,
    KwGlobal,
    KwIf,
    KwImport,
    KwIn,
    KwIs,
    KwLambda,
    KwNonlocal,
    KwNot,
    KwOr,
    KwPass,
    KwRaise,
    KwReturn,
    KwTry,
    KwWhile,
    KwWith,
    KwYield,

    // Operators / punctuation
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    At,
    LShift,
    RShift,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Walrus,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Neq,
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    DoubleSlashEq,
    PercentEq,
    DoubleStarEq,
    AtEq,
    AmpEq,
    PipeEq,
    CaretEq,
    LShiftEq,
    RShiftEq,
    Arrow,
    Dot,
    Ellipsis,
    Comma,
    Colon,
    Semicolon,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Newline,
    Indent,
    Dedent,
    Eof,

    // Literals / identifiers
    Ident(String),
    Int(u64),
    Float(f64),
    Imag,
    /// `offset` is the byte position of `value` in the source.
    String { value: String, kind: StrKind, offset: usize },
}

impl TokenKind {
    pub fn opens_bracket(&self) -> bool {
        matches!(self, TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace)
    }

    pub fn closes_bracket(&self) -> bool {
        matches!(self, TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::KwFalse => "'False'",
            TokenKind::KwNone => "'None'",
            TokenKind::KwTrue => "'True'",
            TokenKind::KwAnd => "'and'",
            TokenKind::KwAs => "'as'",
            TokenKind::KwAssert => "'assert'",
            TokenKind::KwAsync => "'async'",
            TokenKind::KwAwait => "'await'",
            TokenKind::KwBreak => "'break'",
            TokenKind::KwClass => "'class'",
            TokenKind::KwContinue => "'continue'",
            TokenKind::KwDef => "'def'",
            TokenKind::KwDel => "'del'",
            TokenKind::KwElif => "'elif'",
            TokenKind::KwElse => "'else'",
            TokenKind::KwExcept => "'except'",
            TokenKind::KwFinally => "'finally'",
            TokenKind::KwFor => "'for'",
            TokenKind::KwFrom => "'from'",
            TokenKind::KwGlobal => "'global'",
            TokenKind::KwIf => "'if'",
            TokenKind::KwImport => "'import'",
            TokenKind::KwIn => "'in'",
            TokenKind::KwIs => "'is'",
            TokenKind::KwLambda => "'lambda'",
            TokenKind::KwNonlocal => "'nonlocal'",
            TokenKind::KwNot => "'not'",
            TokenKind::KwOr => "'or'",
            TokenKind::KwPass => "'pass'",
            TokenKind::KwRaise => "'raise'",
            TokenKind::KwReturn => "'return'",
            TokenKind::KwTry => "'try'",
            TokenKind::KwWhile => "'while'",
            TokenKind::KwWith => "'with'",
            TokenKind::KwYield => "'yield'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::DoubleStar => "'**'",
            TokenKind::Slash => "'/'",
            TokenKind::DoubleSlash => "'//'",
            TokenKind::Percent => "'%'",
            TokenKind::At => "'@'",
            TokenKind::LShift => "'<<'",
            TokenKind::RShift => "'>>'",
            TokenKind::Amp => "'&'",
            TokenKind::Pipe => "'|'",
            TokenKind::Caret => "'^'",
            TokenKind::Tilde => "'~'",
            TokenKind::Walrus => "':='",
            TokenKind::Lt => "'<'",
            TokenKind::Gt => "'>'",
            TokenKind::Le => "'<='",
            TokenKind::Ge => "'>='",
            TokenKind::EqEq => "'=='",
            TokenKind::Neq => "'!='",
            TokenKind::Eq => "'='",
            TokenKind::PlusEq => "'+='",
            TokenKind::MinusEq => "'-='",
            TokenKind::StarEq => "'*='",
            TokenKind::SlashEq => "'/='",
            TokenKind::DoubleSlashEq => "'//='",
            TokenKind::PercentEq => "'%='",
            TokenKind::DoubleStarEq => "'**='",
            TokenKind::AtEq => "'@='",
            TokenKind::AmpEq => "'&='",
            TokenKind::PipeEq => "'|='",
            TokenKind::CaretEq => "'^='",
            TokenKind::LShiftEq => "'<<='",
            TokenKind::RShiftEq => "'>>='",
            TokenKind::Arrow => "'->'",
            TokenKind::Dot => "'.'",
            TokenKind::Ellipsis => "'...'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Newline => "end of line",
            TokenKind::Indent => "indent",
            TokenKind::Dedent => "dedent",
            TokenKind::Eof => "end of file",
            TokenKind::Ident(_) => "identifier",
            TokenKind::Int(_) => "integer literal",
            TokenKind::Float(_) => "float literal",
            TokenKind::Imag => "imaginary literal",
            TokenKind::String { .. } => "string literal",
        };
        f.write_str(text)
    }
}
