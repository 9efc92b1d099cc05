//! Recursive discovery of source files under a data directory.
//!
//! Files are classified by extension into exactly one [`FileClass`]; anything
//! unrecognised is ignored. Results are sorted by path so every ingestion run
//! sees the same order.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::models::FileClass;

/// Options controlling the directory walk.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

impl From<&ScanConfig> for ScanOptions {
    fn from(cfg: &ScanConfig) -> Self {
        Self {
            exclude_globs: cfg.exclude_globs.clone(),
            follow_symlinks: cfg.follow_symlinks,
        }
    }
}

/// Find every file of `class` under `root`.
///
/// A missing root is an error; an existing root with no matching files is
/// an empty result. Entries the walk cannot read (dangling links, denied
/// directories) are logged and skipped.
pub fn discover(root: &Path, class: FileClass, opts: &ScanOptions) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("data directory does not exist: {}", root.display());
    }

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/generated_db/**".to_string(),
    ];
    default_excludes.extend(opts.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(opts.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(
                    path = ?err.path().map(|p| p.display().to_string()),
                    error = %err,
                    "unreadable entry, skipping"
                );
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }

        if FileClass::from_path(path) == Some(class) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    tracing::debug!(root = %root.display(), ?class, found = files.len(), "scan complete");

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn discovers_recursively_by_class() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::write(root.join("a.csv"), "x\n1").unwrap();
        fs::write(root.join("nested/deeper/b.XLSX"), "").unwrap();
        fs::write(root.join("nested/notes.md"), "# hi").unwrap();
        fs::write(root.join("photo.png"), "").unwrap();
        fs::write(root.join("ignored.bin"), "").unwrap();

        let opts = ScanOptions::default();
        let tabular = discover(root, FileClass::Tabular, &opts).unwrap();
        assert_eq!(tabular.len(), 2);
        assert!(tabular[0].ends_with("a.csv"));

        let text = discover(root, FileClass::Text, &opts).unwrap();
        assert_eq!(text.len(), 1);

        let images = discover(root, FileClass::Image, &opts).unwrap();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn excludes_generated_artifacts_and_globs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("generated_db")).unwrap();
        fs::create_dir_all(root.join("drafts")).unwrap();
        fs::write(root.join("generated_db/old.csv"), "x").unwrap();
        fs::write(root.join("drafts/skip.txt"), "x").unwrap();
        fs::write(root.join("keep.txt"), "x").unwrap();

        let opts = ScanOptions {
            exclude_globs: vec!["drafts/**".to_string()],
            follow_symlinks: false,
        };
        assert!(discover(root, FileClass::Tabular, &opts).unwrap().is_empty());
        let text = discover(root, FileClass::Text, &opts).unwrap();
        assert_eq!(text.len(), 1);
        assert!(text[0].ends_with("keep.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlinks_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("good.txt"), "hello").unwrap();
        std::os::unix::fs::symlink(root.join("gone.txt"), root.join("dangling.txt")).unwrap();

        let opts = ScanOptions {
            exclude_globs: Vec::new(),
            follow_symlinks: true,
        };
        let text = discover(root, FileClass::Text, &opts).unwrap();
        assert_eq!(text.len(), 1);
        assert!(text[0].ends_with("good.txt"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = discover(
            Path::new("/no/such/dir/anywhere"),
            FileClass::Text,
            &ScanOptions::default(),
        );
        assert!(err.is_err());
    }
}
