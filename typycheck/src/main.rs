#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use typycheck::report::{self, JsonReport};
use typycheck::{CheckConfig, Driver, find_config, load_config_file};

const LOG_ENV: &str = "TYPYCHECK_LOG";

#[derive(Parser, Debug)]
#[command(name = "typycheck", version, about = "Static type checker for typed Python")]
struct Cli {
    /// File or directory to check
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Worker threads (0 = one per core)
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Treat warnings as failures
    #[arg(long)]
    warnings_as_errors: bool,

    #[arg(long, value_enum, default_value_t = Format::Human)]
    format: Format,

    /// Explicit `typycheck.toml` or `pyproject.toml`
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only print diagnostics
    #[arg(long, short = 'q')]
    quiet: bool,

    /// More logging (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Human,
    Json,
}

fn init_tracing(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn resolve_config(cli: &Cli) -> miette::Result<CheckConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => match find_config(&cli.path)? {
            Some(loaded) => {
                tracing::info!(config = %loaded.path.display(), "using configuration");
                loaded.config
            }
            None => CheckConfig::default(),
        },
    };
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    if cli.warnings_as_errors {
        config.warnings_as_errors = true;
    }
    Ok(config)
}

fn main() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = resolve_config(&cli)?;
    let driver = Driver::new(config);

    if cli.format == Format::Human && !cli.quiet {
        eprintln!("🦦 typycheck {}", env!("CARGO_PKG_VERSION"));
    }

    let result = driver.check(&cli.path)?;

    match cli.format {
        Format::Human => {
            for diag in result.diagnostics() {
                eprintln!("{:?}", diag.to_report());
            }
            if !cli.quiet {
                eprintln!("{}", report::summary(&result));
            }
        }
        Format::Json => {
            let json = serde_json::to_string_pretty(&JsonReport::new(&result)).into_diagnostic()?;
            let mut out = io::stdout().lock();
            writeln!(out, "{json}").into_diagnostic()?;
        }
    }

    Ok(if result.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
