#![forbid(unsafe_code)]

//! Replacement fields of f-string contents.
//!
//! Only the byte ranges of the interpolated expressions are found here; the
//! parser lexes and parses each range on its own. Conversions (`!r`), format
//! specs (`:>10`) and the `=` debug marker are skipped, while fields nested in
//! a format spec are reported after their parent.

use std::ops::Range;

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FieldError {
    /// Byte offset into the contents.
    pub offset: usize,
    pub message: &'static str,
}

/// Expression ranges in source order.
pub(crate) fn replacement_fields(text: &str) -> Result<Vec<Range<usize>>, FieldError> {
    let mut scanner = Scanner {
        bytes: text.as_bytes(),
        fields: Vec::new(),
    };
    scanner.literal()?;
    Ok(scanner.fields)
}

struct Scanner<'a> {
    bytes: &'a [u8],
    fields: Vec<Range<usize>>,
}

impl Scanner<'_> {
    fn at(&self, i: usize) -> Option<u8> {
        self.bytes.get(i).copied()
    }

    fn literal(&mut self) -> Result<(), FieldError> {
        let mut i = 0;
        while let Some(c) = self.at(i) {
            i = match (c, self.at(i + 1)) {
                (b'{', Some(b'{')) | (b'}', Some(b'}')) => i + 2,
                (b'{', _) => self.field(i)?,
                (b'}', _) => {
                    return Err(FieldError {
                        offset: i,
                        message: "f-string: single '}' is not allowed",
                    });
                }
                _ => i + 1,
            };
        }
        Ok(())
    }

    /// Scans the field opened at `open`; returns the index past its `}`.
    fn field(&mut self, open: usize) -> Result<usize, FieldError> {
        let start = open + 1;
        let mut i = start;
        let mut depth = 0usize;
        let mut quote = None;
        let stop = loop {
            let Some(c) = self.at(i) else {
                return Err(unterminated(open));
            };
            if let Some(q) = quote {
                if c == b'\\' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                b'}' if depth > 0 => depth -= 1,
                b'}' => break i,
                b'!' if depth == 0 && self.at(i + 1) != Some(b'=') => break i,
                b':' if depth == 0 => break i,
                _ => {}
            }
            i += 1;
        };

        let end = self.expression_end(start, stop);
        if self.bytes[start..end].iter().all(u8::is_ascii_whitespace) {
            return Err(FieldError {
                offset: open,
                message: "f-string: empty expression not allowed",
            });
        }
        self.fields.push(start..end);

        i = stop;
        if self.at(i) == Some(b'!') {
            while !matches!(self.at(i), Some(b':' | b'}') | None) {
                i += 1;
            }
        }
        if self.at(i) == Some(b':') {
            i += 1;
            loop {
                match self.at(i) {
                    Some(b'{') => i = self.field(i)?,
                    Some(b'}') => break,
                    Some(_) => i += 1,
                    None => return Err(unterminated(open)),
                }
            }
        }
        match self.at(i) {
            Some(b'}') => Ok(i + 1),
            _ => Err(unterminated(open)),
        }
    }

    /// Drops a trailing `=` debug marker, keeping `==`, `!=`, `<=` and `>=`.
    fn expression_end(&self, start: usize, stop: usize) -> usize {
        let mut end = stop;
        while end > start && self.bytes[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        if end > start && self.bytes[end - 1] == b'=' {
            let before = if end - 1 > start { self.bytes[end - 2] } else { b' ' };
            if !matches!(before, b'=' | b'!' | b'<' | b'>') {
                return end - 1;
            }
        }
        stop
    }
}

fn unterminated(open: usize) -> FieldError {
    FieldError {
        offset: open,
        message: "f-string: expecting '}'",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(text: &str) -> Vec<&str> {
        replacement_fields(text)
            .unwrap()
            .into_iter()
            .map(|r| &text[r])
            .collect()
    }

    #[test]
    fn plain_fields_and_escaped_braces() {
        assert_eq!(fields("a {x} {{b}} {y + 1}"), vec!["x", "y + 1"]);
        assert!(fields("no fields {{}}").is_empty());
    }

    #[test]
    fn conversions_specs_and_debug_markers_are_skipped() {
        assert_eq!(fields("{x!r} {y:>10} {z=} {a == b}"), vec!["x", "y", "z", "a == b"]);
        assert_eq!(fields("{v:{width}.{prec}}"), vec!["v", "width", "prec"]);
        assert_eq!(fields("{d['k']} {s[1:2]} {f(a, b)!s}"), vec!["d['k']", "s[1:2]", "f(a, b)"]);
        assert_eq!(fields("{a != b}"), vec!["a != b"]);
    }

    #[test]
    fn malformed_fields_are_errors() {
        assert_eq!(replacement_fields("ab {x").unwrap_err(), unterminated(3));
        assert_eq!(replacement_fields("a } b").unwrap_err().offset, 2);
        assert_eq!(
            replacement_fields("{ }").unwrap_err().message,
            "f-string: empty expression not allowed"
        );
    }
}
