#![forbid(unsafe_code)]

mod lexer;
mod token;

pub use lexer::{LexError, Lexer};
pub use token::{StrKind, Token, TokenKind};

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .lex()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lex_int_literals_with_bases_and_underscores() {
        let src = "a = 1_000\nb = 0b1010_0110\nc = 0o755\nd = 0xDEAD_BEEF\n";
        let ints: Vec<u64> = kinds(src)
            .iter()
            .filter_map(|k| match k {
                TokenKind::Int(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(ints, vec![1000, 0b1010_0110, 0o755, 0xDEAD_BEEF]);
    }

    #[test]
    fn lex_rejects_bad_int_underscore_placement() {
        let err = Lexer::new("x = 1__0\n").lex().unwrap_err();
        assert!(err.message.contains("invalid integer literal"));
    }

    #[test]
    fn lex_oversized_int_saturates() {
        let ks = kinds("x = 99999999999999999999999999\n");
        assert!(ks.contains(&TokenKind::Int(u64::MAX)));
    }

    #[test]
    fn lex_float_and_imaginary_literals() {
        let ks = kinds("a = 1.5\nb = .25\nc = 1e3\nd = 2j\n");
        assert!(ks.contains(&TokenKind::Float(1.5)));
        assert!(ks.contains(&TokenKind::Float(0.25)));
        assert!(ks.contains(&TokenKind::Float(1000.0)));
        assert!(ks.contains(&TokenKind::Imag));
    }

    #[test]
    fn lex_block_emits_indent_and_dedent() {
        let ks = kinds("if x:\n    y = 1\nz = 2\n");
        let layout: Vec<&TokenKind> = ks
            .iter()
            .filter(|k| {
                matches!(
                    k,
                    TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof
                )
            })
            .collect();
        assert_eq!(
            layout,
            vec![
                &TokenKind::Newline,
                &TokenKind::Indent,
                &TokenKind::Newline,
                &TokenKind::Dedent,
                &TokenKind::Newline,
                &TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lex_blank_and_comment_lines_do_not_affect_layout() {
        let ks = kinds("def f():\n\n    # note\n    return 1\n\n# trailing\n");
        let indents = ks.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = ks.iter().filter(|k| **k == TokenKind::Dedent).count();
        let newlines = ks.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
        assert_eq!(newlines, 2);
    }

    #[test]
    fn lex_newlines_inside_brackets_are_ignored() {
        let ks = kinds("x = [\n    1,\n        2,\n]\n");
        assert!(!ks.contains(&TokenKind::Indent));
        assert_eq!(ks.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn lex_line_continuation_joins_lines() {
        let ks = kinds("x = 1 + \\\n    2\n");
        assert!(!ks.contains(&TokenKind::Indent));
        assert_eq!(ks.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn lex_missing_trailing_newline_still_terminates() {
        let ks = kinds("if x:\n    pass");
        assert_eq!(
            &ks[ks.len() - 3..],
            &[TokenKind::Newline, TokenKind::Dedent, TokenKind::Eof]
        );
    }

    #[test]
    fn lex_string_prefixes_set_kind() {
        let ks = kinds("a = 'x'\nb = b\"y\"\nc = f'{a}'\nd = rb'\\d'\n");
        let strs: Vec<(String, StrKind)> = ks
            .into_iter()
            .filter_map(|k| match k {
                TokenKind::String { value, kind, .. } => Some((value, kind)),
                _ => None,
            })
            .collect();
        assert_eq!(
            strs,
            vec![
                ("x".to_string(), StrKind::Plain),
                ("y".to_string(), StrKind::Bytes),
                ("{a}".to_string(), StrKind::Format),
                ("\\d".to_string(), StrKind::Bytes),
            ]
        );
    }

    #[test]
    fn lex_triple_quoted_string_spans_lines() {
        let ks = kinds("s = \"\"\"one\ntwo\"\"\"\nx = 1\n");
        assert!(ks.contains(&TokenKind::String {
            value: "one\ntwo".to_string(),
            kind: StrKind::Plain,
            offset: 7,
        }));
        assert_eq!(ks.iter().filter(|k| **k == TokenKind::Newline).count(), 2);
    }

    #[test]
    fn lex_unterminated_string_is_reported() {
        let err = Lexer::new("s = 'abc\n").lex().unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn lex_bad_dedent_is_reported() {
        let err = Lexer::new("if x:\n        a = 1\n    b = 2\n").lex().unwrap_err();
        assert!(err.message.contains("unindent does not match"));
    }

    #[test]
    fn lex_recovery_collects_every_error_and_keeps_going() {
        let (tokens, errors) = Lexer::new("x = $\ny = ?\nz = 1\n").lex_with_recovery();
        assert_eq!(errors.len(), 2);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Int(1)));
        assert_eq!(tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
    }

    #[test]
    fn lex_unclosed_bracket_ends_at_statement_keyword() {
        let ks = kinds("def f(:\n    pass\nx = 1\n");
        let layout: Vec<&TokenKind> = ks
            .iter()
            .filter(|k| matches!(k, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent))
            .collect();
        assert_eq!(
            layout,
            vec![
                &TokenKind::Newline,
                &TokenKind::Indent,
                &TokenKind::Newline,
                &TokenKind::Dedent,
                &TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn lex_keywords_are_not_identifiers() {
        let ks = kinds("not_a = None\n");
        assert_eq!(ks[0], TokenKind::Ident("not_a".to_string()));
        assert_eq!(ks[2], TokenKind::KwNone);
    }

    #[test]
    fn lex_skips_leading_byte_order_mark() {
        let tokens = Lexer::new("\u{feff}x = 1\n").lex().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("x".to_string()));
        assert_eq!(tokens[0].span.offset(), 3);

        let err = Lexer::new("x = 1\n\u{feff}y = 2\n").lex().unwrap_err();
        assert_eq!(err.span.offset(), 6);
    }

    #[test]
    fn lex_at_offset_points_into_the_enclosing_file() {
        let tokens = Lexer::at_offset("(a + 'b')", 10).lex().unwrap();
        assert_eq!(tokens[1].span.offset(), 11);
        assert!(matches!(tokens[3].kind, TokenKind::String { offset: 16, .. }));
    }
}
