#![forbid(unsafe_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE: &str = "typycheck.toml";
pub const PYPROJECT_FILE: &str = "pyproject.toml";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    #[diagnostic(code(typycheck::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}: {message}", path.display())]
    #[diagnostic(
        code(typycheck::config::parse),
        help("keys: extensions, exclude, jobs, warnings_as_errors")
    )]
    Parse { path: PathBuf, message: String },
}

/// Settings shared by the library driver and the CLI.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    /// File extensions (without the dot) picked up during discovery.
    pub extensions: Vec<String>,
    /// Directory names skipped during discovery.
    pub exclude: Vec<String>,
    /// Worker threads; 0 lets rayon decide.
    pub jobs: usize,
    #[serde(alias = "warnings-as-errors")]
    pub warnings_as_errors: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["py".to_string(), "pyi".to_string()],
            exclude: [
                ".git",
                "__pycache__",
                ".venv",
                "venv",
                ".mypy_cache",
                "node_modules",
                "build",
                "dist",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            jobs: 0,
            warnings_as_errors: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PyProject {
    #[serde(default)]
    tool: Option<Tool>,
}

#[derive(Debug, Default, Deserialize)]
struct Tool {
    #[serde(default)]
    typycheck: Option<CheckConfig>,
}

/// A configuration file together with the settings it holds.
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: CheckConfig,
}

/// Searches `start` and its ancestors for `typycheck.toml`, or a
/// `pyproject.toml` with a `[tool.typycheck]` table.
///
/// In each directory `typycheck.toml` wins over `pyproject.toml`. A
/// `pyproject.toml` without the table does not stop the search.
pub fn find_config(start: &Path) -> Result<Option<LoadedConfig>, ConfigError> {
    let mut cur = if start.is_file() {
        match start.parent() {
            Some(parent) => parent.to_path_buf(),
            None => return Ok(None),
        }
    } else {
        start.to_path_buf()
    };

    loop {
        let candidate = cur.join(CONFIG_FILE);
        if candidate.is_file() {
            let config = load_config_file(&candidate)?;
            return Ok(Some(LoadedConfig {
                path: candidate,
                config,
            }));
        }
        let candidate = cur.join(PYPROJECT_FILE);
        if candidate.is_file() {
            if let Some(config) = load_pyproject(&candidate)? {
                return Ok(Some(LoadedConfig {
                    path: candidate,
                    config,
                }));
            }
        }
        match cur.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => cur = parent.to_path_buf(),
            _ => return Ok(None),
        }
    }
}

/// Loads an explicit config file; `pyproject.toml` reads `[tool.typycheck]`.
pub fn load_config_file(path: &Path) -> Result<CheckConfig, ConfigError> {
    if path.file_name().is_some_and(|n| n == PYPROJECT_FILE) {
        return Ok(load_pyproject(path)?.unwrap_or_default());
    }
    let raw = read(path)?;
    toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })
}

fn load_pyproject(path: &Path) -> Result<Option<CheckConfig>, ConfigError> {
    let raw = read(path)?;
    let parsed: PyProject = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;
    Ok(parsed.tool.and_then(|t| t.typycheck))
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: CheckConfig = toml::from_str("jobs = 4\n").unwrap();
        assert_eq!(config.jobs, 4);
        assert_eq!(config.extensions, vec!["py", "pyi"]);
        assert!(config.exclude.iter().any(|e| e == "__pycache__"));
    }

    #[test]
    fn kebab_case_alias_is_accepted() {
        let config: CheckConfig = toml::from_str("warnings-as-errors = true\n").unwrap();
        assert!(config.warnings_as_errors);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<CheckConfig>("colour = 'red'\n").is_err());
    }

    #[test]
    fn pyproject_without_table_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PYPROJECT_FILE), "[project]\nname = 'demo'\n").unwrap();
        let nested = dir.path().join("pkg");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join(PYPROJECT_FILE), "[tool.black]\nline-length = 100\n").unwrap();
        let found = find_config(&nested).unwrap();
        assert!(found.is_none() || !found.unwrap().path.starts_with(dir.path()));
    }

    #[test]
    fn nearest_config_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "jobs = 1\n").unwrap();
        let nested = dir.path().join("src");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join(PYPROJECT_FILE), "[tool.typycheck]\njobs = 3\n").unwrap();

        let found = find_config(&nested).unwrap().unwrap();
        assert_eq!(found.path, nested.join(PYPROJECT_FILE));
        assert_eq!(found.config.jobs, 3);

        let found = find_config(dir.path()).unwrap().unwrap();
        assert_eq!(found.config.jobs, 1);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "jobs = \n").unwrap();
        assert!(matches!(load_config_file(&path), Err(ConfigError::Parse { .. })));
    }
}
