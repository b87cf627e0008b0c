#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use typy_ast::{span, span_between, span_start, Span};
use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;

use crate::token::{StrKind, Token, TokenKind};

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(typycheck::lex))]
#[allow(unused_assignments)]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

const TAB_WIDTH: usize = 8;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f\r]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
enum RawToken {
    #[token("\n")]
    Newline,

    #[token("False")]
    KwFalse,
    #[token("None")]
    KwNone,
    #[token("True")]
    KwTrue,
    #[token("and")]
    KwAnd,
    #[token("as")]
    KwAs,
    #[token("assert")]
    KwAssert,
    #[token("async")]
    KwAsync,
    #[token("await")]
    KwAwait,
    #[token("break")]
    KwBreak,
    #[token("class")]
    KwClass,
    #[token("continue")]
    KwContinue,
    #[token("def")]
    KwDef,
    #[token("del")]
    KwDel,
    #[token("elif")]
    KwElif,
    #[token("else")]
    KwElse,
    #[token("except")]
    KwExcept,
    #[token("finally")]
    KwFinally,
    #[token("for")]
    KwFor,
    #[token("from")]
    KwFrom,
    #[token("global")]
    KwGlobal,
    #[token("if")]
    KwIf,
    #[token("import")]
    KwImport,
    #[token("in")]
    KwIn,
    #[token("is")]
    KwIs,
    #[token("lambda")]
    KwLambda,
    #[token("nonlocal")]
    KwNonlocal,
    #[token("not")]
    KwNot,
    #[token("or")]
    KwOr,
    #[token("pass")]
    KwPass,
    #[token("raise")]
    KwRaise,
    #[token("return")]
    KwReturn,
    #[token("try")]
    KwTry,
    #[token("while")]
    KwWhile,
    #[token("with")]
    KwWith,
    #[token("yield")]
    KwYield,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("@")]
    At,
    #[token("<<")]
    LShift,
    #[token(">>")]
    RShift,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token(":=")]
    Walrus,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("//=")]
    DoubleSlashEq,
    #[token("%=")]
    PercentEq,
    #[token("**=")]
    DoubleStarEq,
    #[token("@=")]
    AtEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    LShiftEq,
    #[token(">>=")]
    RShiftEq,
    #[token("->")]
    Arrow,
    #[token(".")]
    Dot,
    #[token("...")]
    Ellipsis,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    #[regex(r"0[bB][01_]+", |lex| parse_int_prefixed(lex.slice(), 2))]
    #[regex(r"0[oO][0-7_]+", |lex| parse_int_prefixed(lex.slice(), 8))]
    #[regex(r"0[xX][0-9a-fA-F_]+", |lex| parse_int_prefixed(lex.slice(), 16))]
    #[regex(r"[0-9][0-9_]*", |lex| parse_int_decimal(lex.slice()))]
    Int(Option<u64>),

    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9_]+)?", |lex| parse_float(lex.slice()))]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9_]+)?", |lex| parse_float(lex.slice()))]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9_]+", |lex| parse_float(lex.slice()))]
    Float(Option<f64>),

    #[regex(r"([0-9][0-9_]*(\.[0-9_]*)?|\.[0-9][0-9_]*)([eE][+-]?[0-9_]+)?[jJ]")]
    Imag,

    // Single-line strings with an optional prefix (r, b, u, f and the two-letter raw combos).
    #[regex(r#"([rRuUfFbB]|[rR][bBfF]|[bBfF][rR])?"([^"\\\n]|\\[^\n]|\\\n)*""#)]
    #[regex(r#"([rRuUfFbB]|[rR][bBfF]|[bBfF][rR])?'([^'\\\n]|\\[^\n]|\\\n)*'"#)]
    String,

    #[regex(r#"([rRuUfFbB]|[rR][bBfF]|[bBfF][rR])?""""#, |lex| finish_triple(lex, "\"\"\""))]
    #[regex(r#"([rRuUfFbB]|[rR][bBfF]|[bBfF][rR])?'''"#, |lex| finish_triple(lex, "'''"))]
    TripleString,

    #[regex(r#"([rRuUfFbB]|[rR][bBfF]|[bBfF][rR])?"([^"\\\n]|\\[^\n])*"#)]
    #[regex(r#"([rRuUfFbB]|[rR][bBfF]|[bBfF][rR])?'([^'\\\n]|\\[^\n])*"#)]
    UnterminatedString,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn parse_int_decimal(s: &str) -> Option<u64> {
    let digits = strip_underscores(s)?;
    Some(digits.parse::<u64>().unwrap_or(u64::MAX))
}

fn parse_int_prefixed(s: &str, radix: u32) -> Option<u64> {
    let rest = s.get(2..)?;
    let rest = rest.strip_prefix('_').unwrap_or(rest);
    let digits = strip_underscores(rest)?;
    Some(u64::from_str_radix(&digits, radix).unwrap_or(u64::MAX))
}

fn parse_float(s: &str) -> Option<f64> {
    if s.contains("__") || s.contains("_.") || s.contains("._") || s.ends_with('_') {
        return None;
    }
    s.replace('_', "").parse::<f64>().ok()
}

fn strip_underscores(s: &str) -> Option<String> {
    if s.is_empty() {
        return None;
    }
    if s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return None;
    }
    Some(s.replace('_', ""))
}

/// Consumes a triple-quoted string body up to and including the closing quotes.
fn finish_triple(lex: &mut logos::Lexer<RawToken>, quote: &str) -> bool {
    let rest = lex.remainder();
    let bytes = rest.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i..].starts_with(quote.as_bytes()) {
            lex.bump(i + quote.len());
            return true;
        }
        i += 1;
    }
    lex.bump(rest.len());
    false
}

fn string_prefix_len(text: &str) -> usize {
    text.chars()
        .take_while(|c| *c != '"' && *c != '\'')
        .map(char::len_utf8)
        .sum()
}

fn string_token(text: &str, at: usize, quote_len: usize) -> TokenKind {
    let prefix_len = string_prefix_len(text);
    let prefix = text[..prefix_len].to_ascii_lowercase();
    let kind = if prefix.contains('b') {
        StrKind::Bytes
    } else if prefix.contains('f') {
        StrKind::Format
    } else {
        StrKind::Plain
    };
    let start = prefix_len + quote_len;
    let end = text.len().saturating_sub(quote_len).max(start);
    TokenKind::String {
        value: text[start..end].to_string(),
        kind,
        offset: at + start,
    }
}

fn is_statement_keyword(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::KwDef
            | TokenKind::KwClass
            | TokenKind::KwReturn
            | TokenKind::KwImport
            | TokenKind::KwPass
            | TokenKind::KwBreak
            | TokenKind::KwContinue
            | TokenKind::KwRaise
            | TokenKind::KwTry
            | TokenKind::KwExcept
            | TokenKind::KwFinally
            | TokenKind::KwWhile
            | TokenKind::KwWith
            | TokenKind::KwGlobal
            | TokenKind::KwNonlocal
            | TokenKind::KwDel
            | TokenKind::KwAssert
            | TokenKind::KwElif
    )
}

/// Byte order mark, skipped at the start of a file.
const BOM: char = '\u{feff}';

/// Column of the first non-blank character of the line containing `pos`.
fn indent_width(src: &str, pos: usize) -> (usize, usize) {
    let line_start = src[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut width = 0usize;
    for ch in src[line_start..].chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
            '\x0c' => width = 0,
            _ => break,
        }
    }
    (line_start, width)
}

pub struct Lexer<'a> {
    src: &'a str,
    base: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, base: 0 }
    }

    /// Lexer for text that starts at byte `base` of an enclosing file, such
    /// as an f-string replacement field. Spans point into the enclosing file.
    pub fn at_offset(src: &'a str, base: usize) -> Self {
        Self { src, base }
    }

    /// Tokenize, stopping at the first error.
    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let (tokens, mut errors) = self.lex_with_recovery();
        if errors.is_empty() {
            Ok(tokens)
        } else {
            Err(errors.remove(0))
        }
    }

    /// Tokenize the whole input, collecting every error.
    ///
    /// Offending characters are dropped from the token stream so the parser can
    /// keep going; the returned stream always ends with `Eof`.
    pub fn lex_with_recovery(&self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        let mut indent_stack: Vec<usize> = vec![0];
        let mut depth = 0usize;
        let mut line_has_tokens = false;
        let mut bracketed_newline: Option<usize> = None;

        let mut lex = RawToken::lexer(self.src);
        if self.src.starts_with(BOM) {
            lex.bump(BOM.len_utf8());
        }
        while let Some(raw) = lex.next() {
            let range = lex.span();
            let span = span_between(range.start, range.end);

            let kind = match raw {
                Ok(RawToken::Newline) => {
                    if depth > 0 {
                        bracketed_newline = Some(range.start);
                    }
                    if depth == 0 && line_has_tokens {
                        tokens.push(Token {
                            kind: TokenKind::Newline,
                            span,
                        });
                        line_has_tokens = false;
                    }
                    continue;
                }

                Ok(RawToken::KwFalse) => TokenKind::KwFalse,
                Ok(RawToken::KwNone) => TokenKind::KwNone,
                Ok(RawToken::KwTrue) => TokenKind::KwTrue,
                Ok(RawToken::KwAnd) => TokenKind::KwAnd,
                Ok(RawToken::KwAs) => TokenKind::KwAs,
                Ok(RawToken::KwAssert) => TokenKind::KwAssert,
                Ok(RawToken::KwAsync) => TokenKind::KwAsync,
                Ok(RawToken::KwAwait) => TokenKind::KwAwait,
                Ok(RawToken::KwBreak) => TokenKind::KwBreak,
                Ok(RawToken::KwClass) => TokenKind::KwClass,
                Ok(RawToken::KwContinue) => TokenKind::KwContinue,
                Ok(RawToken::KwDef) => TokenKind::KwDef,
                Ok(RawToken::KwDel) => TokenKind::KwDel,
                Ok(RawToken::KwElif) => TokenKind::KwElif,
                Ok(RawToken::KwElse) => TokenKind::KwElse,
                Ok(RawToken::KwExcept) => TokenKind::KwExcept,
                Ok(RawToken::KwFinally) => TokenKind::KwFinally,
                Ok(RawToken::KwFor) => TokenKind::KwFor,
                Ok(RawToken::KwFrom) => TokenKind::KwFrom,
                Ok(RawToken::KwGlobal) => TokenKind::KwGlobal,
                Ok(RawToken::KwIf) => TokenKind::KwIf,
                Ok(RawToken::KwImport) => TokenKind::KwImport,
                Ok(RawToken::KwIn) => TokenKind::KwIn,
                Ok(RawToken::KwIs) => TokenKind::KwIs,
                Ok(RawToken::KwLambda) => TokenKind::KwLambda,
                Ok(RawToken::KwNonlocal) => TokenKind::KwNonlocal,
                Ok(RawToken::KwNot) => TokenKind::KwNot,
                Ok(RawToken::KwOr) => TokenKind::KwOr,
                Ok(RawToken::KwPass) => TokenKind::KwPass,
                Ok(RawToken::KwRaise) => TokenKind::KwRaise,
                Ok(RawToken::KwReturn) => TokenKind::KwReturn,
                Ok(RawToken::KwTry) => TokenKind::KwTry,
                Ok(RawToken::KwWhile) => TokenKind::KwWhile,
                Ok(RawToken::KwWith) => TokenKind::KwWith,
                Ok(RawToken::KwYield) => TokenKind::KwYield,

                Ok(RawToken::Plus) => TokenKind::Plus,
                Ok(RawToken::Minus) => TokenKind::Minus,
                Ok(RawToken::Star) => TokenKind::Star,
                Ok(RawToken::DoubleStar) => TokenKind::DoubleStar,
                Ok(RawToken::Slash) => TokenKind::Slash,
                Ok(RawToken::DoubleSlash) => TokenKind::DoubleSlash,
                Ok(RawToken::Percent) => TokenKind::Percent,
                Ok(RawToken::At) => TokenKind::At,
                Ok(RawToken::LShift) => TokenKind::LShift,
                Ok(RawToken::RShift) => TokenKind::RShift,
                Ok(RawToken::Amp) => TokenKind::Amp,
                Ok(RawToken::Pipe) => TokenKind::Pipe,
                Ok(RawToken::Caret) => TokenKind::Caret,
                Ok(RawToken::Tilde) => TokenKind::Tilde,
                Ok(RawToken::Walrus) => TokenKind::Walrus,
                Ok(RawToken::Lt) => TokenKind::Lt,
                Ok(RawToken::Gt) => TokenKind::Gt,
                Ok(RawToken::Le) => TokenKind::Le,
                Ok(RawToken::Ge) => TokenKind::Ge,
                Ok(RawToken::EqEq) => TokenKind::EqEq,
                Ok(RawToken::Neq) => TokenKind::Neq,
                Ok(RawToken::Eq) => TokenKind::Eq,
                Ok(RawToken::PlusEq) => TokenKind::PlusEq,
                Ok(RawToken::MinusEq) => TokenKind::MinusEq,
                Ok(RawToken::StarEq) => TokenKind::StarEq,
                Ok(RawToken::SlashEq) => TokenKind::SlashEq,
                Ok(RawToken::DoubleSlashEq) => TokenKind::DoubleSlashEq,
                Ok(RawToken::PercentEq) => TokenKind::PercentEq,
                Ok(RawToken::DoubleStarEq) => TokenKind::DoubleStarEq,
                Ok(RawToken::AtEq) => TokenKind::AtEq,
                Ok(RawToken::AmpEq) => TokenKind::AmpEq,
                Ok(RawToken::PipeEq) => TokenKind::PipeEq,
                Ok(RawToken::CaretEq) => TokenKind::CaretEq,
                Ok(RawToken::LShiftEq) => TokenKind::LShiftEq,
                Ok(RawToken::RShiftEq) => TokenKind::RShiftEq,
                Ok(RawToken::Arrow) => TokenKind::Arrow,
                Ok(RawToken::Dot) => TokenKind::Dot,
                Ok(RawToken::Ellipsis) => TokenKind::Ellipsis,
                Ok(RawToken::Comma) => TokenKind::Comma,
                Ok(RawToken::Colon) => TokenKind::Colon,
                Ok(RawToken::Semicolon) => TokenKind::Semicolon,

                Ok(RawToken::LParen) => TokenKind::LParen,
                Ok(RawToken::RParen) => TokenKind::RParen,
                Ok(RawToken::LBracket) => TokenKind::LBracket,
                Ok(RawToken::RBracket) => TokenKind::RBracket,
                Ok(RawToken::LBrace) => TokenKind::LBrace,
                Ok(RawToken::RBrace) => TokenKind::RBrace,

                Ok(RawToken::Ident(s)) => TokenKind::Ident(s),
                Ok(RawToken::Int(Some(n))) => TokenKind::Int(n),
                Ok(RawToken::Int(None)) => {
                    errors.push(LexError {
                        message: "invalid integer literal".to_string(),
                        span,
                    });
                    TokenKind::Int(0)
                }
                Ok(RawToken::Float(Some(x))) => TokenKind::Float(x),
                Ok(RawToken::Float(None)) => {
                    errors.push(LexError {
                        message: "invalid float literal".to_string(),
                        span,
                    });
                    TokenKind::Float(0.0)
                }
                Ok(RawToken::Imag) => TokenKind::Imag,
                Ok(RawToken::String) => string_token(lex.slice(), range.start, 1),
                Ok(RawToken::TripleString) => string_token(lex.slice(), range.start, 3),
                Ok(RawToken::UnterminatedString) => {
                    errors.push(LexError {
                        message: "unterminated string literal".to_string(),
                        span,
                    });
                    continue;
                }

                Err(_) => {
                    let slice = lex.slice();
                    let message = if slice.contains("\"\"\"") || slice.contains("'''") {
                        "unterminated triple-quoted string literal".to_string()
                    } else {
                        match slice.chars().next() {
                            Some(c) => format!("unexpected character {c:?}"),
                            None => "unexpected token".to_string(),
                        }
                    };
                    errors.push(LexError { message, span });
                    continue;
                }
            };

            // An unclosed bracket must not swallow the rest of the file: a
            // statement keyword on a fresh line ends the logical line.
            if let Some(pos) = bracketed_newline.take() {
                if depth > 0 && is_statement_keyword(&kind) {
                    depth = 0;
                    tokens.push(Token {
                        kind: TokenKind::Newline,
                        span: span_between(pos, pos),
                    });
                    line_has_tokens = false;
                }
            }

            if !line_has_tokens && depth == 0 {
                self.handle_indent(range.start, &mut indent_stack, &mut tokens, &mut errors);
            }
            line_has_tokens = true;

            if kind.opens_bracket() {
                depth += 1;
            } else if kind.closes_bracket() {
                depth = depth.saturating_sub(1);
            }

            tokens.push(Token { kind, span });
        }

        let end = span_between(self.src.len(), self.src.len());
        if line_has_tokens {
            tokens.push(Token {
                kind: TokenKind::Newline,
                span: end,
            });
        }

        // Close open indents.
        while indent_stack.len() > 1 {
            indent_stack.pop();
            tokens.push(Token {
                kind: TokenKind::Dedent,
                span: end,
            });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: end,
        });

        if self.base > 0 {
            for token in &mut tokens {
                token.span = self.shift(token.span);
                if let TokenKind::String { offset, .. } = &mut token.kind {
                    *offset += self.base;
                }
            }
            for err in &mut errors {
                err.span = self.shift(err.span);
            }
        }
        (tokens, errors)
    }

    fn shift(&self, s: Span) -> Span {
        span(span_start(s) + self.base, s.len())
    }

    fn handle_indent(
        &self,
        token_start: usize,
        indent_stack: &mut Vec<usize>,
        tokens: &mut Vec<Token>,
        errors: &mut Vec<LexError>,
    ) {
        let (line_start, width) = indent_width(self.src, token_start);
        let current = *indent_stack.last().unwrap_or(&0);
        let indent_span = span_between(line_start, token_start);

        if width > current {
            indent_stack.push(width);
            tokens.push(Token {
                kind: TokenKind::Indent,
                span: indent_span,
            });
        } else if width < current {
            while let Some(&top) = indent_stack.last() {
                if width >= top {
                    break;
                }
                indent_stack.pop();
                tokens.push(Token {
                    kind: TokenKind::Dedent,
                    span: span_between(token_start, token_start),
                });
            }
            if *indent_stack.last().unwrap_or(&0) != width {
                errors.push(LexError {
                    message: "unindent does not match any outer indentation level".to_string(),
                    span: indent_span,
                });
            }
        }
    }
}
