#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use typy_ast::Span;
use typy_lex::LexError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("syntax error: {message}")]
#[diagnostic(code(typycheck::syntax))]
#[allow(unused_assignments)]
pub struct SyntaxError {
    pub message: String,
    #[label]
    pub span: Span,
}

impl From<LexError> for SyntaxError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            span: err.span,
        }
    }
}
