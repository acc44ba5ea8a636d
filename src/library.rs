//! Library discovery.
//!
//! Walks the configured root with `walkdir`, filters by include/exclude
//! `globset` patterns, and returns the files the synchronizer should track.
//! A file's name is its path relative to the root, `/`-separated; that name
//! is the manifest key and the `filename` on every chunk.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::LibraryConfig;
use crate::error::IndexError;

/// A file found under the library root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryFile {
    /// Root-relative, `/`-separated.
    pub name: String,
    pub path: PathBuf,
}

/// Result of one walk over the library root.
#[derive(Debug, Default)]
pub struct LibraryScan {
    /// Matching files, sorted by name.
    pub files: Vec<LibraryFile>,
    /// Entries the walk could not read. Each error's file is the
    /// root-relative name of the entry, or `""` when unknown.
    pub errors: Vec<IndexError>,
}

impl LibraryScan {
    /// True when `name` is at or below an entry the walk failed on, so
    /// its absence from `files` proves nothing.
    pub fn is_obscured(&self, name: &str) -> bool {
        self.errors.iter().any(|err| match err.file() {
            "" => true,
            prefix => {
                name == prefix
                    || name
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        })
    }
}

/// Walk the library root. Only a missing root or a bad glob is fatal;
/// unreadable entries are collected in [`LibraryScan::errors`].
pub fn scan_library(config: &LibraryConfig) -> Result<LibraryScan> {
    let root = &config.root;
    if !root.is_dir() {
        bail!("Library root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/.*/**".to_string(),
        "**/.*".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut scan = LibraryScan::default();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let name = err
                    .path()
                    .map(|p| relative_name(p.strip_prefix(root).unwrap_or(p)))
                    .unwrap_or_default();
                warn!(file = %name, error = %err, "skipping unreadable entry");
                scan.errors.push(IndexError::FileRead {
                    file: name,
                    source: err.into(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = relative_name(relative);

        if exclude_set.is_match(&name) {
            continue;
        }
        if !include_set.is_match(&name) {
            continue;
        }

        scan.files.push(LibraryFile {
            name,
            path: path.to_path_buf(),
        });
    }

    // Sort for deterministic ordering
    scan.files.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(scan)
}

/// Resolve a library-relative name to a path under `root`.
///
/// Names that climb out of the root with `..` are rejected.
pub fn resolve(root: &Path, name: &str) -> std::io::Result<PathBuf> {
    let mut path = root.to_path_buf();
    for part in name.split('/').filter(|part| !part.is_empty() && *part != ".") {
        if part == ".." {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}' is outside the library root", name),
            ));
        }
        path.push(part);
    }
    Ok(path)
}

fn relative_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
