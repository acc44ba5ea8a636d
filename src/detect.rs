//! Content-addressed change detection.
//!
//! A file's identity is the SHA-256 of its bytes; modification times are
//! never consulted. [`classify`] compares the digests of the files on disk
//! against the [`Manifest`] and sorts every filename into exactly one of
//! unchanged / new / modified / removed.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::IndexError;
use crate::library::LibraryScan;
use crate::manifest::Manifest;

const BLOCK_SIZE: usize = 8192;

/// Hex SHA-256 of a file, read in 8 KiB blocks.
pub fn digest_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// [`digest_file`] on the blocking pool.
pub async fn digest_file_async(name: &str, path: &Path) -> Result<String, IndexError> {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || digest_file(&owned))
        .await
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
        .and_then(|inner| inner);

    result.map_err(|source| IndexError::FileRead {
        file: name.to_string(),
        source,
    })
}

/// A file that needs (re)processing, with the digest it had when classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub name: String,
    pub path: PathBuf,
    pub digest: String,
}

/// Classification of one pass. Every list is in filename order.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub unchanged: Vec<String>,
    pub new: Vec<FileChange>,
    pub modified: Vec<FileChange>,
    pub removed: Vec<String>,
    /// Entries the walk could not read and files whose digest could not
    /// be computed.
    pub errors: Vec<IndexError>,
}

impl ChangeSet {
    /// True when a sync would neither add, update, nor remove anything.
    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Classify a library scan against `manifest`.
///
/// An unreadable file is reported in [`ChangeSet::errors`] and counts as
/// present on disk, so its manifest entry is not mistaken for a removal.
/// The same holds for anything at or below an entry the walk failed on.
pub async fn classify(scan: LibraryScan, manifest: &Manifest) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut on_disk = BTreeSet::new();

    for file in &scan.files {
        on_disk.insert(file.name.as_str());

        let digest = match digest_file_async(&file.name, &file.path).await {
            Ok(digest) => digest,
            Err(err) => {
                changes.errors.push(err);
                continue;
            }
        };

        let change = FileChange {
            name: file.name.clone(),
            path: file.path.clone(),
            digest,
        };
        match manifest.get(&file.name) {
            Some(known) if known == change.digest => changes.unchanged.push(change.name),
            Some(_) => changes.modified.push(change),
            None => changes.new.push(change),
        }
    }

    changes.removed = manifest
        .iter()
        .map(|(name, _)| name)
        .filter(|name| !on_disk.contains(name) && !scan.is_obscured(name))
        .map(str::to_string)
        .collect();
    changes.errors.extend(scan.errors);

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryFile;
    use tempfile::TempDir;

    fn file(root: &Path, name: &str, body: &[u8]) -> LibraryFile {
        let path = root.join(name);
        std::fs::write(&path, body).unwrap();
        LibraryFile {
            name: name.to_string(),
            path,
        }
    }

    #[test]
    fn test_digest_known_value() {
        let tmp = TempDir::new().unwrap();
        let f = file(tmp.path(), "abc.txt", b"abc");
        assert_eq!(
            digest_file(&f.path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_spans_blocks() {
        let tmp = TempDir::new().unwrap();
        let body = vec![7u8; BLOCK_SIZE * 3 + 5];
        let f = file(tmp.path(), "big.bin", &body);
        let expected = hex::encode(Sha256::digest(&body));
        assert_eq!(digest_file(&f.path).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_classify_all_categories() {
        let tmp = TempDir::new().unwrap();
        let same = file(tmp.path(), "same.md", b"same");
        let changed = file(tmp.path(), "changed.md", b"after");
        let fresh = file(tmp.path(), "fresh.md", b"fresh");

        let mut manifest = Manifest::new();
        manifest.insert("same.md", digest_file(&same.path).unwrap());
        manifest.insert("changed.md", hex::encode(Sha256::digest(b"before")));
        manifest.insert("gone.md", "00");

        let scan = LibraryScan {
            files: vec![changed, fresh, same],
            errors: vec![],
        };
        let changes = classify(scan, &manifest).await;

        assert_eq!(changes.unchanged, vec!["same.md".to_string()]);
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.modified[0].name, "changed.md");
        assert_eq!(changes.new.len(), 1);
        assert_eq!(changes.new[0].name, "fresh.md");
        assert_eq!(changes.removed, vec!["gone.md".to_string()]);
        assert!(changes.errors.is_empty());
        assert!(!changes.is_clean());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_error_not_removal() {
        let tmp = TempDir::new().unwrap();
        let missing = LibraryFile {
            name: "vanished.md".into(),
            path: tmp.path().join("vanished.md"),
        };
        let mut manifest = Manifest::new();
        manifest.insert("vanished.md", "00");

        let scan = LibraryScan {
            files: vec![missing],
            errors: vec![],
        };
        let changes = classify(scan, &manifest).await;
        assert_eq!(changes.errors.len(), 1);
        assert!(matches!(changes.errors[0], IndexError::FileRead { .. }));
        assert!(changes.removed.is_empty());
        assert!(changes.is_clean());
    }

    #[tokio::test]
    async fn test_walk_error_keeps_manifest_entries_below_it() {
        let mut manifest = Manifest::new();
        manifest.insert("vault/a.md", "00");
        manifest.insert("vaulted.md", "00");
        let scan = LibraryScan {
            files: vec![],
            errors: vec![IndexError::FileRead {
                file: "vault".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }],
        };

        let changes = classify(scan, &manifest).await;
        assert_eq!(changes.removed, vec!["vaulted.md".to_string()]);
        assert_eq!(changes.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_mtime_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let f = file(tmp.path(), "a.md", b"content");
        let mut manifest = Manifest::new();
        manifest.insert("a.md", digest_file(&f.path).unwrap());

        // Rewrite identical bytes; only the timestamp moves.
        std::fs::write(&f.path, b"content").unwrap();
        let scan = LibraryScan {
            files: vec![f],
            errors: vec![],
        };
        let changes = classify(scan, &manifest).await;
        assert_eq!(changes.unchanged, vec!["a.md".to_string()]);
    }
}
