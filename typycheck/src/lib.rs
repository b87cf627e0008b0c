#![forbid(unsafe_code)]

//! Project driver for the typycheck checker.
//!
//! [`Driver::check`] discovers the source files under a path, runs every file
//! through parse, scope building and checking on a rayon pool, and returns
//! the diagnostics of all files in discovery order.

pub mod config;
pub mod discover;
pub mod report;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use miette::Diagnostic as MietteDiagnostic;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};
use typy_ast::span;
use typy_core::{Diagnostic, DiagnosticCode, Diagnostics};

pub use typy_core::Stage;

pub use config::{CheckConfig, ConfigError, LoadedConfig, find_config, load_config_file};
pub use discover::discover;
pub use report::JsonReport;

#[derive(Debug, Error, MietteDiagnostic)]
pub enum CheckError {
    #[error("path not found: {}", path.display())]
    #[diagnostic(code(typycheck::not_found), help("pass an existing file or directory"))]
    NotFound { path: PathBuf },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

/// Outcome for a single file.
#[derive(Clone, Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
    pub duration: Duration,
}

impl FileReport {
    pub fn success(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn warnings(&self) -> usize {
        self.diagnostics.len() - self.errors()
    }
}

/// Outcome for a whole run.
#[derive(Clone, Debug)]
pub struct CheckResult {
    pub files: Vec<FileReport>,
    pub duration: Duration,
    pub warnings_as_errors: bool,
}

impl CheckResult {
    pub fn success(&self) -> bool {
        self.error_count() == 0 && !(self.warnings_as_errors && self.warning_count() > 0)
    }

    /// Every diagnostic, file by file in discovery order.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.files.iter().flat_map(|f| f.diagnostics.iter())
    }

    pub fn files_checked(&self) -> usize {
        self.files.len()
    }

    pub fn error_count(&self) -> usize {
        self.files.iter().map(FileReport::errors).sum()
    }

    pub fn warning_count(&self) -> usize {
        self.files.iter().map(FileReport::warnings).sum()
    }
}

/// Stack for pool workers. Dropping very long operator chains recurses once
/// per operand.
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug, Default)]
pub struct Driver {
    config: CheckConfig,
}

impl Driver {
    pub fn new(config: CheckConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Checks a file or every source file below a directory.
    pub fn check(&self, path: impl AsRef<Path>) -> Result<CheckResult, CheckError> {
        let path = path.as_ref();
        let started = Instant::now();
        if !path.exists() {
            return Err(CheckError::NotFound {
                path: path.to_path_buf(),
            });
        }

        debug!(stage = %Stage::Discovering, path = %path.display());
        let paths = discover(path, &self.config);
        info!(files = paths.len(), "discovered source files");

        let files = self.run(&paths);
        let result = CheckResult {
            files,
            duration: started.elapsed(),
            warnings_as_errors: self.config.warnings_as_errors,
        };
        debug!(
            stage = %Stage::Done,
            errors = result.error_count(),
            warnings = result.warning_count(),
            elapsed = ?result.duration,
        );
        Ok(result)
    }

    fn run(&self, paths: &[PathBuf]) -> Vec<FileReport> {
        let work = || paths.par_iter().map(|p| check_file(p)).collect::<Vec<_>>();
        let mut builder = rayon::ThreadPoolBuilder::new().stack_size(WORKER_STACK_SIZE);
        if self.config.jobs > 0 {
            builder = builder.num_threads(self.config.jobs);
        }
        match builder.build() {
            Ok(pool) => pool.install(work),
            Err(err) => {
                warn!(error = %err, jobs = self.config.jobs, "falling back to the global thread pool");
                work()
            }
        }
    }
}

/// Checks `path` with the default configuration.
pub fn type_check(path: impl AsRef<Path>) -> Result<CheckResult, CheckError> {
    Driver::default().check(path)
}

/// Reads and checks one file. Unreadable or non-UTF-8 files yield a single
/// `Io` diagnostic.
pub fn check_file(path: &Path) -> FileReport {
    let started = Instant::now();
    match fs::read(path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => check_source(path, &text),
            Err(_) => io_report(path, "file is not valid UTF-8".to_string(), started),
        },
        Err(err) => io_report(path, format!("cannot read file: {err}"), started),
    }
}

fn io_report(path: &Path, message: String, started: Instant) -> FileReport {
    warn!(path = %path.display(), %message);
    let mut diags = Diagnostics::new(path, "");
    diags.add(DiagnosticCode::Io, span(0, 0), message);
    FileReport {
        path: path.to_path_buf(),
        diagnostics: diags.into_vec(),
        duration: started.elapsed(),
    }
}

/// Checks in-memory text as if it were the contents of `path`.
pub fn check_source(path: impl AsRef<Path>, text: &str) -> FileReport {
    let path = path.as_ref();
    let started = Instant::now();
    let diagnostics = typy_core::check_source(path, text);
    let duration = started.elapsed();
    debug!(path = %path.display(), diagnostics = diagnostics.len(), ?duration, "checked");
    FileReport {
        path: path.to_path_buf(),
        diagnostics,
        duration,
    }
}
