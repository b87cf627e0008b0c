#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

use crate::config::CheckConfig;

/// Source files under `root`, sorted.
///
/// A file root is returned as-is whatever its extension. Hidden and excluded
/// directories are not entered; directory symlinks are not followed.
pub fn discover(root: &Path, config: &CheckConfig) -> Vec<PathBuf> {
    if !root.is_dir() {
        return vec![root.to_path_buf()];
    }
    let mut out = Vec::new();
    walk(root, config, &mut out);
    out.sort();
    out
}

fn walk(dir: &Path, config: &CheckConfig, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "skipping unreadable directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if file_type.is_dir() {
            if name.starts_with('.') || config.exclude.iter().any(|e| *e == name) {
                trace!(dir = %path.display(), "excluded");
                continue;
            }
            walk(&path, config, out);
        } else if (file_type.is_file() || (file_type.is_symlink() && path.is_file()))
            && has_extension(&path, &config.extensions)
        {
            out.push(path);
        }
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.trim_start_matches('.') == ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "").unwrap();
    }

    #[test]
    fn walks_sorted_and_skips_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for rel in [
            "b.py",
            "a/z.pyi",
            "a/m.py",
            "notes.txt",
            ".hidden/x.py",
            "__pycache__/c.py",
            "venv/lib/site.py",
        ] {
            touch(&root.join(rel));
        }
        let found: Vec<PathBuf> = discover(root, &CheckConfig::default())
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            found,
            vec![PathBuf::from("a/m.py"), PathBuf::from("a/z.pyi"), PathBuf::from("b.py")]
        );
    }

    #[test]
    fn custom_extensions() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("m.py"));
        touch(&dir.path().join("s.pyi"));
        let config = CheckConfig {
            extensions: vec![".pyi".to_string()],
            ..CheckConfig::default()
        };
        let found = discover(dir.path(), &config);
        assert_eq!(found, vec![dir.path().join("s.pyi")]);
    }

    #[test]
    fn file_root_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("script");
        touch(&file);
        assert_eq!(discover(&file, &CheckConfig::default()), vec![file]);
    }
}
