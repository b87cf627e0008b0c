#![forbid(unsafe_code)]

mod annotations;
pub mod builtins;
mod calls;
mod checker;
pub mod diagnostics;
mod infer;
mod narrow;
pub mod scope;
pub mod types;

use std::fmt;
use std::path::Path;

use tracing::trace;

pub use checker::check_module;
pub use diagnostics::{Diagnostic, DiagnosticCode, Diagnostics, Location, RelatedLocation, Severity};
pub use scope::SymbolTable;
pub use types::Type;

/// Pipeline stage, used for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Discovering,
    Parsing,
    Building,
    Checking,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Discovering => "discovering",
            Stage::Parsing => "parsing",
            Stage::Building => "building",
            Stage::Checking => "checking",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Runs the whole pipeline over one in-memory file.
///
/// Syntax errors come first, then declaration diagnostics, then body
/// diagnostics. A file with syntax errors is still checked as far as the
/// recovered tree allows.
pub fn check_source(path: impl AsRef<Path>, text: &str) -> Vec<Diagnostic> {
    let path = path.as_ref();
    let mut diags = Diagnostics::new(path, text);

    trace!(stage = %Stage::Parsing, path = %path.display());
    let (module, errors) = typy_parse::parse_source_with_recovery(text);
    for err in errors {
        diags.add(DiagnosticCode::SyntaxError, err.span, err.message);
    }

    trace!(stage = %Stage::Building, path = %path.display());
    let mut table = SymbolTable::build(&module, &mut diags);

    trace!(stage = %Stage::Checking, path = %path.display());
    check_module(&module, &mut table, &mut diags);
    diags.into_vec()
}
