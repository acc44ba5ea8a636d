//! Persistent filename → content digest map.
//!
//! The manifest is the synchronizer's memory of what it has indexed. It is
//! stored as a pretty-printed JSON object with sorted keys and replaced
//! atomically on save (write `*.json.tmp`, then rename over the target), so
//! an interrupted write never leaves a half-written file behind.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IndexError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the manifest, falling back to an empty one.
    ///
    /// A missing file is a first run. An unreadable or malformed file is
    /// logged as a warning and treated as empty, which makes the next sync
    /// reprocess everything.
    pub async fn load(path: &Path) -> Self {
        match Self::try_load(path).await {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(error = %err, "starting from an empty manifest");
                Self::new()
            }
        }
    }

    /// Like [`load`](Self::load) but reports corruption instead of hiding it.
    pub async fn try_load(path: &Path) -> std::result::Result<Self, IndexError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => {
                return Err(IndexError::ManifestCorrupt {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|err| IndexError::ManifestCorrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace manifest {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.entries.get(filename).map(String::as_str)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries.contains_key(filename)
    }

    pub fn insert(&mut self, filename: impl Into<String>, digest: impl Into<String>) {
        self.entries.insert(filename.into(), digest.into());
    }

    pub fn remove(&mut self, filename: &str) -> Option<String> {
        self.entries.remove(filename)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in filename order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
