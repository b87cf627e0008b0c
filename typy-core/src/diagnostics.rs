#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::{LabeledSpan, NamedSource, SourceCode};
use thiserror::Error;
use typy_ast::{Span, span_start};

/// Diagnostic severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Fails the check
    Error,
    /// Reported, fails only with `warnings_as_errors`
    Warning,
}

impl Severity {
    pub fn display(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    SyntaxError,
    SymbolConflictError,
    TypeMismatch,
    ArityError,
    UndefinedName,
    UnsupportedOperation,
    UnknownAttribute,
    InvalidAnnotation,
    Redefinition,
    Io,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::SyntaxError => "SyntaxError",
            DiagnosticCode::SymbolConflictError => "SymbolConflictError",
            DiagnosticCode::TypeMismatch => "TypeMismatch",
            DiagnosticCode::ArityError => "ArityError",
            DiagnosticCode::UndefinedName => "UndefinedName",
            DiagnosticCode::UnsupportedOperation => "UnsupportedOperation",
            DiagnosticCode::UnknownAttribute => "UnknownAttribute",
            DiagnosticCode::InvalidAnnotation => "InvalidAnnotation",
            DiagnosticCode::Redefinition => "Redefinition",
            DiagnosticCode::Io => "Io",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticCode::Redefinition => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Source location (1-based)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub line: u32,
    pub col: u32,
}

/// Secondary location, e.g. a previous declaration.
#[derive(Clone, Debug)]
pub struct RelatedLocation {
    pub span: Span,
    pub location: Location,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Span,
    pub path: PathBuf,
    pub location: Location,
    pub related: Vec<RelatedLocation>,
    source: Arc<NamedSource<String>>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Full rendering: code, labels and a snippet of the file.
    pub fn to_report(&self) -> miette::Report {
        miette::Report::new(Rendered {
            message: self.message.clone(),
            code: self.code,
            severity: self.severity,
            span: self.span,
            related: self
                .related
                .iter()
                .map(|r| (r.span, r.message.clone()))
                .collect(),
            source_code: Arc::clone(&self.source),
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}[{}]: {}",
            self.path.display(),
            self.location.line,
            self.location.col,
            self.severity.display(),
            self.code.as_str(),
            self.message
        )
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
struct Rendered {
    message: String,
    code: DiagnosticCode,
    severity: Severity,
    span: Span,
    related: Vec<(Span, String)>,
    source_code: Arc<NamedSource<String>>,
}

impl miette::Diagnostic for Rendered {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(format!("typycheck::{}", self.code.as_str())))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(match self.severity {
            Severity::Error => miette::Severity::Error,
            Severity::Warning => miette::Severity::Warning,
        })
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        Some(&*self.source_code)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let primary = LabeledSpan::new_primary_with_span(None, self.span);
        let related = self
            .related
            .iter()
            .map(|(span, message)| LabeledSpan::new_with_span(Some(message.clone()), *span));
        Some(Box::new(std::iter::once(primary).chain(related)))
    }
}

/// Byte offset to line/column conversion for one file.
#[derive(Clone, Debug)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    /// Columns count characters, not bytes.
    pub fn location(&self, text: &str, offset: usize) -> Location {
        let offset = offset.min(text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let col = text
            .get(start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(offset - start);
        Location {
            line: line as u32 + 1,
            col: col as u32 + 1,
        }
    }
}

/// Ordered, deduplicating collector for one file.
pub struct Diagnostics {
    path: PathBuf,
    text: Arc<str>,
    source: Arc<NamedSource<String>>,
    lines: LineIndex,
    items: Vec<Diagnostic>,
    seen: HashSet<(usize, usize, String)>,
}

impl Diagnostics {
    pub fn new(path: &Path, text: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            text: Arc::from(text),
            source: Arc::new(NamedSource::new(path.display().to_string(), text.to_string())),
            lines: LineIndex::new(text),
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn location(&self, span: Span) -> Location {
        self.lines.location(&self.text, span_start(span))
    }

    pub fn add(&mut self, code: DiagnosticCode, span: Span, message: impl Into<String>) {
        self.report(code, span, message.into(), Vec::new());
    }

    pub fn add_with_related(
        &mut self,
        code: DiagnosticCode,
        span: Span,
        message: impl Into<String>,
        related: Vec<(Span, String)>,
    ) {
        self.report(code, span, message.into(), related);
    }

    fn report(&mut self, code: DiagnosticCode, span: Span, message: String, related: Vec<(Span, String)>) {
        let key = (span_start(span), span.len(), message.clone());
        if !self.seen.insert(key) {
            return;
        }
        let related = related
            .into_iter()
            .map(|(span, message)| RelatedLocation {
                span,
                location: self.location(span),
                message,
            })
            .collect();
        self.items.push(Diagnostic {
            severity: code.severity(),
            code,
            message,
            span,
            path: self.path.clone(),
            location: self.location(span),
            related,
            source: Arc::clone(&self.source),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typy_ast::span;

    #[test]
    fn locations_are_one_based_and_count_chars() {
        let text = "x = 1\ny = 'é'; z\n";
        let idx = LineIndex::new(text);
        assert_eq!(idx.location(text, 0), Location { line: 1, col: 1 });
        assert_eq!(idx.location(text, 6), Location { line: 2, col: 1 });
        let z = text.find('z').unwrap();
        assert_eq!(idx.location(text, z), Location { line: 2, col: 11 });
    }

    #[test]
    fn identical_span_and_message_is_stored_once() {
        let mut d = Diagnostics::new(Path::new("m.py"), "x = 1\n");
        d.add(DiagnosticCode::TypeMismatch, span(4, 1), "bad");
        d.add(DiagnosticCode::TypeMismatch, span(4, 1), "bad");
        d.add(DiagnosticCode::TypeMismatch, span(4, 1), "other");
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn display_is_compact() {
        let mut d = Diagnostics::new(Path::new("m.py"), "x = 1\n");
        d.add(DiagnosticCode::Redefinition, span(0, 1), "redefinition of `x`");
        let items = d.into_vec();
        assert_eq!(items[0].to_string(), "m.py:1:1: warning[Redefinition]: redefinition of `x`");
        assert!(!items[0].is_error());
    }

    #[test]
    fn report_carries_code_source_and_labels() {
        let mut d = Diagnostics::new(Path::new("m.py"), "def f() -> None:\n    pass\n\nf = 1\n");
        d.add_with_related(
            DiagnosticCode::SymbolConflictError,
            span(30, 1),
            "conflict",
            vec![(span(4, 1), "previous declaration".to_string())],
        );
        let report = d.into_vec()[0].to_report();
        assert_eq!(report.to_string(), "conflict");
        assert_eq!(
            report.code().map(|c| c.to_string()).as_deref(),
            Some("typycheck::SymbolConflictError")
        );
        assert!(report.source_code().is_some());
        assert_eq!(report.labels().map(Iterator::count), Some(2));
    }
}
