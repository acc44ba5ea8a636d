//! Incremental library synchronization.
//!
//! [`LibrarySync`] owns the manifest and drives one pass:
//!
//! 1. scan the library root,
//! 2. classify files against the manifest by content digest,
//! 3. delete chunks of removed files,
//! 4. for new and modified files: delete any chunks stored under the name, then
//!    parse, chunk, embed, ingest, and record the digest.
//!
//! A failure in step 3 or 4 is recorded for that file only. Its manifest
//! entry stays as it was, so the next pass retries it. The manifest is
//! persisted after the removals and after every successfully indexed file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use libris_core::chunk::ChunkSplitter;
use libris_core::embedding::Embedder;
use libris_core::store::VectorStore;
use tracing::{debug, error, info, warn};

use crate::config::{Config, LibraryConfig};
use crate::detect::{self, ChangeSet, FileChange};
use crate::error::IndexError;
use crate::library;
use crate::manifest::Manifest;
use crate::parser::{DocumentParser, LibraryParser};

/// What the synchronizer needs from configuration.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub library: LibraryConfig,
    pub manifest_path: PathBuf,
    pub splitter: ChunkSplitter,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            library: config.library.clone(),
            manifest_path: config.manifest_path(),
            splitter: config
                .chunking
                .splitter()
                .with_context(|| "Invalid [chunking] configuration")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Added,
    Updated,
    Removed,
    Reindexed,
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Reindexed => "reindexed",
        };
        f.write_str(label)
    }
}

/// Outcome for one file.
///
/// `Ok(n)` is the number of chunks written, or deleted for
/// [`FileAction::Removed`]. In a dry run it is always `Ok(0)`.
#[derive(Debug)]
pub struct FileReport {
    pub name: String,
    pub action: FileAction,
    pub outcome: Result<usize, IndexError>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub dry_run: bool,
    pub unchanged: Vec<String>,
    /// Removals first, then additions and updates in filename order.
    pub files: Vec<FileReport>,
    /// Files that could not be hashed; left untouched.
    pub unreadable: Vec<IndexError>,
    /// Set when the pass stopped early on the cancellation flag.
    pub cancelled: bool,
}

impl SyncReport {
    pub fn count(&self, action: FileAction) -> usize {
        self.files
            .iter()
            .filter(|f| f.action == action && f.outcome.is_ok())
            .count()
    }

    pub fn chunks_written(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.action != FileAction::Removed)
            .filter_map(|f| f.outcome.as_ref().ok())
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &IndexError> {
        self.files
            .iter()
            .filter_map(|f| f.outcome.as_ref().err())
            .chain(self.unreadable.iter())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none() && !self.cancelled
    }
}

/// Summary of the current index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LibraryStats {
    pub indexed_files: usize,
    pub total_chunks: usize,
}

pub struct LibrarySync {
    settings: SyncSettings,
    parser: Arc<dyn DocumentParser>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    manifest: Manifest,
    cancel: Arc<AtomicBool>,
}

impl LibrarySync {
    /// Load the manifest and assemble a synchronizer.
    pub async fn open(
        settings: SyncSettings,
        parser: Arc<dyn DocumentParser>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let manifest = Manifest::load(&settings.manifest_path).await;
        Self {
            settings,
            parser,
            embedder,
            store,
            manifest,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// [`open`](Self::open) with the default [`LibraryParser`].
    pub async fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let settings = SyncSettings::from_config(config)?;
        let parser = Arc::new(LibraryParser::new(config.parsing.page_chars));
        Ok(Self::open(settings, parser, embedder, store).await)
    }

    /// Setting the flag stops a running pass before its next file.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Classify the library without touching the store or the manifest.
    pub async fn plan(&self) -> Result<ChangeSet> {
        let scan = library::scan_library(&self.settings.library)?;
        Ok(detect::classify(scan, &self.manifest).await)
    }

    /// Run one pass. Only a failure to scan the library or to persist the
    /// manifest aborts it; per-file failures land in the report.
    pub async fn sync(&mut self, dry_run: bool) -> Result<SyncReport> {
        let changes = self.plan().await?;
        let mut report = SyncReport {
            dry_run,
            ..SyncReport::default()
        };

        for err in &changes.errors {
            warn!(error = %err, "skipping unreadable file");
        }

        if dry_run {
            report.unchanged = changes.unchanged;
            report.unreadable = changes.errors;
            for name in changes.removed {
                report.files.push(FileReport {
                    name,
                    action: FileAction::Removed,
                    outcome: Ok(0),
                });
            }
            for change in merge_pending(changes.new, changes.modified) {
                report.files.push(FileReport {
                    name: change.0.name,
                    action: change.1,
                    outcome: Ok(0),
                });
            }
            return Ok(report);
        }

        if changes.is_clean() {
            debug!(unchanged = changes.unchanged.len(), "library is up to date");
        }

        // Removals before insertions.
        let mut removed_any = false;
        for name in changes.removed {
            let outcome = self.remove_file(&name).await;
            removed_any |= outcome.is_ok();
            report.files.push(FileReport {
                name,
                action: FileAction::Removed,
                outcome,
            });
        }
        if removed_any {
            self.persist().await?;
        }

        for (change, action) in merge_pending(changes.new, changes.modified) {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("sync cancelled; remaining files will be picked up next time");
                report.cancelled = true;
                break;
            }

            let outcome = self.index_file(&change).await;
            if outcome.is_ok() {
                self.manifest.insert(change.name.clone(), change.digest.clone());
                self.persist().await?;
            }
            report.files.push(FileReport {
                name: change.name,
                action,
                outcome,
            });
        }

        report.unchanged = changes.unchanged;
        report.unreadable = changes.errors;
        Ok(report)
    }

    /// Drop a file's chunks and manifest entry, then index it again
    /// whatever its digest. A missing or unreadable file, or a name outside
    /// the library root, changes nothing.
    pub async fn force_reindex(&mut self, name: &str) -> Result<FileReport> {
        let located = async {
            let path = library::resolve(&self.settings.library.root, name).map_err(|source| {
                IndexError::FileRead {
                    file: name.to_string(),
                    source,
                }
            })?;
            let digest = detect::digest_file_async(name, &path).await?;
            Ok::<_, IndexError>((path, digest))
        }
        .await;
        let (path, digest) = match located {
            Ok(found) => found,
            Err(err) => {
                warn!(file = %name, error = %err, "cannot reindex");
                return Ok(FileReport {
                    name: name.to_string(),
                    action: FileAction::Reindexed,
                    outcome: Err(err),
                });
            }
        };

        let change = FileChange {
            name: name.to_string(),
            path,
            digest,
        };

        let outcome = match self.remove_file(name).await {
            Ok(_) => {
                self.persist().await?;
                let outcome = self.index_file(&change).await;
                if outcome.is_ok() {
                    self.manifest.insert(change.name.clone(), change.digest.clone());
                    self.persist().await?;
                }
                outcome
            }
            Err(err) => Err(err),
        };

        Ok(FileReport {
            name: change.name,
            action: FileAction::Reindexed,
            outcome,
        })
    }

    /// Empty the store and the manifest.
    pub async fn clear(&mut self) -> Result<()> {
        clear_index(self.store.as_ref(), &self.settings.manifest_path).await?;
        self.manifest.clear();
        Ok(())
    }

    pub async fn stats(&self) -> Result<LibraryStats> {
        library_stats(&self.manifest, self.store.as_ref()).await
    }

    async fn remove_file(&mut self, name: &str) -> Result<usize, IndexError> {
        match self.store.delete_by_filename(name).await {
            Ok(deleted) => {
                self.manifest.remove(name);
                info!(file = %name, chunks = deleted, "removed");
                Ok(deleted)
            }
            Err(err) => {
                let err = IndexError::store(name, &err);
                error!(file = %name, error = %err, "removal failed");
                Err(err)
            }
        }
    }

    /// Parse, chunk, embed and ingest one file. Returns chunks written.
    async fn index_file(&self, change: &FileChange) -> Result<usize, IndexError> {
        let name = change.name.as_str();
        let result = self.try_index_file(change).await;
        match &result {
            Ok(chunks) => info!(file = %name, chunks, "indexed"),
            Err(err) => error!(file = %name, error = %err, "indexing failed"),
        }
        result
    }

    async fn try_index_file(&self, change: &FileChange) -> Result<usize, IndexError> {
        let name = change.name.as_str();

        // New files too: the store may hold chunks the manifest never
        // recorded (corrupt manifest, crash before persist).
        let deleted = self
            .store
            .delete_by_filename(name)
            .await
            .map_err(|e| IndexError::store(name, &e))?;
        if deleted > 0 {
            debug!(file = %name, chunks = deleted, "dropped stale chunks");
        }

        let doc = self.parser.parse(name, &change.path).await?;
        let chunks = self.settings.splitter.chunk_document(&doc, name);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| IndexError::embed(name, &e))?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::Embed {
                file: name.to_string(),
                reason: format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            });
        }

        self.store
            .ingest(&chunks, &vectors)
            .await
            .map_err(|e| IndexError::store(name, &e))?;
        Ok(chunks.len())
    }

    async fn persist(&self) -> Result<()> {
        self.manifest
            .save(&self.settings.manifest_path)
            .await
            .with_context(|| "Failed to persist manifest")
    }
}

/// Index summary from a manifest and the store it describes.
pub async fn library_stats(manifest: &Manifest, store: &dyn VectorStore) -> Result<LibraryStats> {
    Ok(LibraryStats {
        indexed_files: manifest.len(),
        total_chunks: store.count().await?,
    })
}

/// Empty `store` and persist an empty manifest at `manifest_path`.
pub async fn clear_index(store: &dyn VectorStore, manifest_path: &Path) -> Result<()> {
    store.clear().await.context("Failed to clear store")?;
    Manifest::new()
        .save(manifest_path)
        .await
        .with_context(|| "Failed to persist manifest")?;
    info!("index cleared");
    Ok(())
}

/// New and modified files back in filename order, tagged with their action.
fn merge_pending(new: Vec<FileChange>, modified: Vec<FileChange>) -> Vec<(FileChange, FileAction)> {
    let mut pending: Vec<(FileChange, FileAction)> = new
        .into_iter()
        .map(|c| (c, FileAction::Added))
        .chain(modified.into_iter().map(|c| (c, FileAction::Updated)))
        .collect();
    pending.sort_by(|a, b| a.0.name.cmp(&b.0.name));
    pending
}
