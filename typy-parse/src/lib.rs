#![forbid(unsafe_code)]

mod error;
mod fstring;
mod parser;

use typy_ast::{span_start, Expr, Module};
use typy_lex::Lexer;

pub use error::SyntaxError;
pub use parser::{MAX_NESTING, Parser};

/// Parse a whole file, failing on the first lexical or syntax error.
pub fn parse_source(src: &str) -> Result<Module, SyntaxError> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_module()
}

/// Parse a source file while recovering from errors.
///
/// Returns a best-effort AST and every lexical and syntax error, ordered by
/// position. A syntax error on a line that already carries a lexical error is
/// dropped: it is almost always a consequence of the dropped characters.
pub fn parse_source_with_recovery(src: &str) -> (Module, Vec<SyntaxError>) {
    let (tokens, lex_errors) = Lexer::new(src).lex_with_recovery();
    let mut parser = Parser::new(&tokens);
    let (module, parse_errors) = parser.parse_module_with_recovery();

    let lex_lines: Vec<usize> = lex_errors
        .iter()
        .map(|e| line_of(src, span_start(e.span)))
        .collect();
    let mut errors: Vec<SyntaxError> = lex_errors.into_iter().map(SyntaxError::from).collect();
    errors.extend(
        parse_errors
            .into_iter()
            .filter(|e| !lex_lines.contains(&line_of(src, span_start(e.span)))),
    );
    errors.sort_by_key(|e| span_start(e.span));
    (module, errors)
}

/// Parse a single expression, e.g. the contents of a string annotation.
pub fn parse_expr(src: &str) -> Result<Expr, SyntaxError> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_expr_eof()
}

fn line_of(src: &str, offset: usize) -> usize {
    let end = offset.min(src.len());
    src.as_bytes()[..end].iter().filter(|b| **b == b'\n').count()
}
