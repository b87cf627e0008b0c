#![forbid(unsafe_code)]

use serde::Serialize;
use typy_ast::Span;
use typy_core::Diagnostic;

use crate::CheckResult;

pub const SCHEMA: &str = "typycheck.report.v1";

#[derive(Debug, Clone, Serialize)]
pub struct SpanRange {
    pub offset: usize,
    pub len: usize,
}

impl From<Span> for SpanRange {
    fn from(s: Span) -> Self {
        Self {
            offset: s.offset(),
            len: s.len(),
        }
    }
}

/// Machine-readable form of a whole run (`--format json`).
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    pub schema: &'static str,
    pub success: bool,
    pub files_checked: usize,
    pub errors: usize,
    pub warnings: usize,
    pub duration_ms: u128,
    pub diagnostics: Vec<JsonDiagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonDiagnostic {
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub severity: &'static str,
    pub code: &'static str,
    pub message: String,
    pub span: SpanRange,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<JsonRelated>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRelated {
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub span: SpanRange,
}

impl From<&Diagnostic> for JsonDiagnostic {
    fn from(d: &Diagnostic) -> Self {
        Self {
            path: d.path.display().to_string(),
            line: d.location.line,
            column: d.location.col,
            severity: d.severity.display(),
            code: d.code.as_str(),
            message: d.message.clone(),
            span: d.span.into(),
            related: d
                .related
                .iter()
                .map(|r| JsonRelated {
                    line: r.location.line,
                    column: r.location.col,
                    message: r.message.clone(),
                    span: r.span.into(),
                })
                .collect(),
        }
    }
}

impl JsonReport {
    pub fn new(result: &CheckResult) -> Self {
        Self {
            schema: SCHEMA,
            success: result.success(),
            files_checked: result.files_checked(),
            errors: result.error_count(),
            warnings: result.warning_count(),
            duration_ms: result.duration.as_millis(),
            diagnostics: result.diagnostics().map(JsonDiagnostic::from).collect(),
        }
    }
}

/// One line summary printed after the human-readable diagnostics.
pub fn summary(result: &CheckResult) -> String {
    let files = match result.files_checked() {
        1 => "1 file".to_string(),
        n => format!("{n} files"),
    };
    let elapsed = format!("{:.2?}", result.duration);
    let (errors, warnings) = (result.error_count(), result.warning_count());
    if errors == 0 && warnings == 0 {
        return format!("no issues found in {files} ({elapsed})");
    }
    let plural = |n: usize, word: &str| if n == 1 { format!("1 {word}") } else { format!("{n} {word}s") };
    format!(
        "found {} and {} in {files} ({elapsed})",
        plural(errors, "error"),
        plural(warnings, "warning")
    )
}
