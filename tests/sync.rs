//! Library synchronization against an in-memory store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use libris::config::LibraryConfig;
use libris::core::chunk::ChunkSplitter;
use libris::core::embedding::Embedder;
use libris::core::store::memory::InMemoryStore;
use libris::core::store::VectorStore;
use libris::embedding::EmbeddingProvider;
use libris::error::IndexError;
use libris::manifest::Manifest;
use libris::parser::LibraryParser;
use libris::sync::{FileAction, LibrarySync, SyncSettings};
use tempfile::TempDir;

struct TestLibrary {
    _tmp: TempDir,
    root: PathBuf,
    manifest_path: PathBuf,
}

impl TestLibrary {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("books");
        fs::create_dir_all(root.join("poetry")).unwrap();
        let manifest_path = tmp.path().join("state").join("manifest.json");

        let lib = Self {
            _tmp: tmp,
            root,
            manifest_path,
        };
        lib.write(
            "moby.md",
            "# Moby Dick\n\n## Loomings\n\nCall me Ishmael. Some years ago, never mind how long \
             precisely, having little or no money in my purse.\n\n## The Carpet-Bag\n\n\
             I stuffed a shirt or two into my old carpet-bag and started for Cape Horn.",
        );
        lib.write(
            "notes.txt",
            "Reading notes on whales, harpoons and the open sea.",
        );
        lib.write(
            "poetry/raven.md",
            "# The Raven\n\nOnce upon a midnight dreary, while I pondered, weak and weary.",
        );
        lib
    }

    fn write(&self, name: &str, content: &str) {
        fs::write(self.root.join(name), content).unwrap();
    }

    fn settings(&self) -> SyncSettings {
        SyncSettings {
            library: LibraryConfig {
                root: self.root.clone(),
                manifest_path: Some(self.manifest_path.clone()),
                include_globs: vec![
                    "**/*.md".to_string(),
                    "**/*.txt".to_string(),
                    "**/*.pdf".to_string(),
                ],
                exclude_globs: Vec::new(),
                follow_symlinks: false,
            },
            manifest_path: self.manifest_path.clone(),
            splitter: ChunkSplitter::new(80, 16).unwrap(),
        }
    }

    async fn open(&self, store: Arc<InMemoryStore>) -> LibrarySync {
        self.open_with(store, Arc::new(EmbeddingProvider::hash(64)))
            .await
    }

    async fn open_with(&self, store: Arc<InMemoryStore>, embedder: Arc<dyn Embedder>) -> LibrarySync {
        LibrarySync::open(
            self.settings(),
            Arc::new(LibraryParser::new(3000)),
            embedder,
            store,
        )
        .await
    }
}

fn names(manifest: &Manifest) -> Vec<&str> {
    manifest.iter().map(|(name, _)| name).collect()
}

fn mtime(path: &Path) -> std::time::SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

/// Fails any batch that contains the marker text.
struct PickyEmbedder {
    inner: EmbeddingProvider,
    marker: &'static str,
}

#[async_trait]
impl Embedder for PickyEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains(self.marker)) {
            bail!("refusing to embed '{}'", self.marker);
        }
        self.inner.embed_batch(texts).await
    }
}

#[tokio::test]
async fn test_first_sync_indexes_everything() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;

    let report = syncer.sync(false).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.count(FileAction::Added), 3);
    assert!(report.unchanged.is_empty());

    assert_eq!(
        names(syncer.manifest()),
        vec!["moby.md", "notes.txt", "poetry/raven.md"]
    );
    assert_eq!(store.count().await.unwrap(), report.chunks_written());
    assert!(!store.ids_for("moby.md").unwrap().is_empty());

    let stats = syncer.stats().await.unwrap();
    assert_eq!(stats.indexed_files, 3);
    assert_eq!(stats.total_chunks, report.chunks_written());

    let on_disk = Manifest::try_load(&lib.manifest_path).await.unwrap();
    assert_eq!(&on_disk, syncer.manifest());
}

#[tokio::test]
async fn test_second_sync_touches_nothing() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();

    let mutations = store.mutation_count();
    let manifest_before = syncer.manifest().clone();
    let written_at = mtime(&lib.manifest_path);

    let report = syncer.sync(false).await.unwrap();
    assert!(report.files.is_empty());
    assert_eq!(report.unchanged.len(), 3);
    assert_eq!(store.mutation_count(), mutations);
    assert_eq!(syncer.manifest(), &manifest_before);
    assert_eq!(mtime(&lib.manifest_path), written_at);
}

#[tokio::test]
async fn test_modified_file_is_replaced_and_others_untouched() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();

    let raven_ids = store.ids_for("poetry/raven.md").unwrap();
    let moby_ids = store.ids_for("moby.md").unwrap();
    let old_digest = syncer.manifest().get("notes.txt").unwrap().to_string();
    let mutations = store.mutation_count();

    lib.write("notes.txt", "Completely different notes about the Nantucket fleet.");
    let report = syncer.sync(false).await.unwrap();

    assert_eq!(report.count(FileAction::Updated), 1);
    assert_eq!(report.count(FileAction::Added), 0);
    assert_eq!(report.files[0].name, "notes.txt");
    // One delete and one ingest.
    assert_eq!(store.mutation_count(), mutations + 2);

    assert_eq!(store.ids_for("poetry/raven.md").unwrap(), raven_ids);
    assert_eq!(store.ids_for("moby.md").unwrap(), moby_ids);
    assert_ne!(syncer.manifest().get("notes.txt").unwrap(), old_digest);

    let results = store
        .query(&[syncer_embed("Nantucket fleet").await], 10)
        .await
        .unwrap()
        .remove(0);
    let notes: Vec<_> = results
        .into_iter()
        .filter(|r| r.metadata.filename == "notes.txt")
        .collect();
    assert!(!notes.is_empty());
    assert!(notes.iter().all(|r| r.content.contains("Nantucket")));
}

async fn syncer_embed(text: &str) -> Vec<f32> {
    EmbeddingProvider::hash(64)
        .embed_batch(&[text.to_string()])
        .await
        .unwrap()
        .remove(0)
}

#[tokio::test]
async fn test_touch_without_content_change_is_unchanged() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();

    // Same bytes rewritten: new mtime, same digest.
    let content = fs::read_to_string(lib.root.join("notes.txt")).unwrap();
    lib.write("notes.txt", &content);

    let report = syncer.sync(false).await.unwrap();
    assert!(report.files.is_empty());
    assert_eq!(report.unchanged.len(), 3);
}

#[tokio::test]
async fn test_removed_file_drops_its_chunks() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();

    let raven_chunks = store.ids_for("poetry/raven.md").unwrap().len();
    let total = store.count().await.unwrap();
    fs::remove_file(lib.root.join("poetry/raven.md")).unwrap();

    let report = syncer.sync(false).await.unwrap();
    assert_eq!(report.count(FileAction::Removed), 1);
    assert_eq!(report.files[0].outcome.as_ref().ok(), Some(&raven_chunks));
    assert!(store.ids_for("poetry/raven.md").unwrap().is_empty());
    assert_eq!(store.count().await.unwrap(), total - raven_chunks);
    assert!(!syncer.manifest().contains("poetry/raven.md"));

    let on_disk = Manifest::try_load(&lib.manifest_path).await.unwrap();
    assert!(!on_disk.contains("poetry/raven.md"));
}

#[tokio::test]
async fn test_failed_file_is_retried_next_time() {
    let lib = TestLibrary::new();
    lib.write("cursed.txt", "This passage contains the word LEVIATHAN.");
    let store = Arc::new(InMemoryStore::new());
    let picky = Arc::new(PickyEmbedder {
        inner: EmbeddingProvider::hash(64),
        marker: "LEVIATHAN",
    });
    let mut syncer = lib.open_with(store.clone(), picky).await;

    let report = syncer.sync(false).await.unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.count(FileAction::Added), 3);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], IndexError::Embed { file, .. } if file == "cursed.txt"));
    assert!(!syncer.manifest().contains("cursed.txt"));
    assert!(store.ids_for("cursed.txt").unwrap().is_empty());

    // A healthy embedder picks it up on the next pass.
    let mut syncer = lib.open(store.clone()).await;
    let report = syncer.sync(false).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.count(FileAction::Added), 1);
    assert_eq!(report.files[0].name, "cursed.txt");
    assert_eq!(report.unchanged.len(), 3);
    assert!(syncer.manifest().contains("cursed.txt"));
}

#[tokio::test]
async fn test_invalid_pdf_does_not_stop_the_pass() {
    let lib = TestLibrary::new();
    fs::write(lib.root.join("broken.pdf"), b"%PDF-nonsense").unwrap();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;

    let report = syncer.sync(false).await.unwrap();
    assert_eq!(report.count(FileAction::Added), 3);
    let failed: Vec<_> = report
        .files
        .iter()
        .filter(|f| f.outcome.is_err())
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(failed, vec!["broken.pdf"]);
    assert_eq!(report.failures().next().unwrap().kind(), "parse");
    assert!(!syncer.manifest().contains("broken.pdf"));
}

#[tokio::test]
async fn test_force_reindex_ignores_digest() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();

    let old_ids = store.ids_for("moby.md").unwrap();
    let raven_ids = store.ids_for("poetry/raven.md").unwrap();
    let digest = syncer.manifest().get("moby.md").unwrap().to_string();

    let report = syncer.force_reindex("moby.md").await.unwrap();
    assert_eq!(report.action, FileAction::Reindexed);
    assert_eq!(report.outcome.as_ref().ok(), Some(&old_ids.len()));

    let new_ids = store.ids_for("moby.md").unwrap();
    assert_eq!(new_ids.len(), old_ids.len());
    assert!(new_ids.iter().all(|id| !old_ids.contains(id)));
    assert_eq!(store.ids_for("poetry/raven.md").unwrap(), raven_ids);
    assert_eq!(syncer.manifest().get("moby.md"), Some(digest.as_str()));
}

#[tokio::test]
async fn test_force_reindex_missing_file_changes_nothing() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();

    let mutations = store.mutation_count();
    let manifest = syncer.manifest().clone();

    let report = syncer.force_reindex("missing.md").await.unwrap();
    assert!(matches!(report.outcome, Err(IndexError::FileRead { .. })));
    assert_eq!(store.mutation_count(), mutations);
    assert_eq!(syncer.manifest(), &manifest);
}

#[tokio::test]
async fn test_clear_empties_store_and_manifest() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();

    syncer.clear().await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(syncer.manifest().is_empty());
    assert!(Manifest::try_load(&lib.manifest_path).await.unwrap().is_empty());

    let stats = syncer.stats().await.unwrap();
    assert_eq!((stats.indexed_files, stats.total_chunks), (0, 0));

    // Everything comes back as new.
    let report = syncer.sync(false).await.unwrap();
    assert_eq!(report.count(FileAction::Added), 3);
}

#[tokio::test]
async fn test_cancelled_pass_indexes_nothing() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.cancel_flag().store(true, Ordering::SeqCst);

    let report = syncer.sync(false).await.unwrap();
    assert!(report.cancelled);
    assert!(report.files.is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(syncer.manifest().is_empty());
}

#[tokio::test]
async fn test_corrupt_manifest_reindexes_without_duplicates() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();
    let moby_chunks = store.ids_for("moby.md").unwrap().len();
    let total = store.count().await.unwrap();

    fs::write(&lib.manifest_path, "{ not json").unwrap();
    assert!(matches!(
        Manifest::try_load(&lib.manifest_path).await,
        Err(IndexError::ManifestCorrupt { .. })
    ));

    let mut syncer = lib.open(store.clone()).await;
    assert!(syncer.manifest().is_empty());

    let report = syncer.sync(false).await.unwrap();
    assert_eq!(report.count(FileAction::Added), 3);
    assert_eq!(store.ids_for("moby.md").unwrap().len(), moby_chunks);
    assert_eq!(store.count().await.unwrap(), total);
    assert_eq!(Manifest::try_load(&lib.manifest_path).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_new_file_replaces_unrecorded_chunks() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();
    let raven_chunks = store.ids_for("poetry/raven.md").unwrap().len();

    // Chunks ingested but the manifest entry never written.
    let mut manifest = syncer.manifest().clone();
    manifest.remove("poetry/raven.md");
    manifest.save(&lib.manifest_path).await.unwrap();

    let mut syncer = lib.open(store.clone()).await;
    let report = syncer.sync(false).await.unwrap();
    assert_eq!(report.count(FileAction::Added), 1);
    assert_eq!(report.files[0].name, "poetry/raven.md");
    assert_eq!(store.ids_for("poetry/raven.md").unwrap().len(), raven_chunks);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unwalkable_entry_does_not_stop_the_pass() {
    let lib = TestLibrary::new();
    let target = lib.root.join("shelf.md");
    lib.write("shelf.md", "# Shelf\n\nA linked book about lighthouses.");
    std::os::unix::fs::symlink(&target, lib.root.join("linked.md")).unwrap();

    let mut settings = lib.settings();
    settings.library.follow_symlinks = true;
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = LibrarySync::open(
        settings,
        Arc::new(LibraryParser::new(3000)),
        Arc::new(EmbeddingProvider::hash(64)),
        store.clone(),
    )
    .await;
    syncer.sync(false).await.unwrap();
    assert!(syncer.manifest().contains("linked.md"));
    let linked_chunks = store.ids_for("linked.md").unwrap().len();

    // The link now dangles and the walk fails on it.
    fs::remove_file(&target).unwrap();
    lib.write("fresh.md", "# Fresh\n\nA book added after the link broke.");

    let report = syncer.sync(false).await.unwrap();
    assert_eq!(report.unreadable.len(), 1);
    assert!(matches!(
        &report.unreadable[0],
        IndexError::FileRead { file, .. } if file == "linked.md"
    ));
    assert_eq!(report.count(FileAction::Added), 1);
    assert_eq!(report.count(FileAction::Removed), 1);
    assert!(syncer.manifest().contains("fresh.md"));
    assert!(!syncer.manifest().contains("shelf.md"));

    // Not provably gone, so kept.
    assert!(syncer.manifest().contains("linked.md"));
    assert_eq!(store.ids_for("linked.md").unwrap().len(), linked_chunks);
}

#[tokio::test]
async fn test_force_reindex_rejects_names_outside_root() {
    let lib = TestLibrary::new();
    fs::write(lib.root.parent().unwrap().join("outside.md"), "# Outside").unwrap();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;
    syncer.sync(false).await.unwrap();

    let mutations = store.mutation_count();
    let report = syncer.force_reindex("../outside.md").await.unwrap();
    assert!(matches!(report.outcome, Err(IndexError::FileRead { .. })));
    assert_eq!(store.mutation_count(), mutations);
    assert!(!syncer.manifest().contains("../outside.md"));
    assert!(store.ids_for("../outside.md").unwrap().is_empty());
}

#[tokio::test]
async fn test_dry_run_reports_without_writing() {
    let lib = TestLibrary::new();
    let store = Arc::new(InMemoryStore::new());
    let mut syncer = lib.open(store.clone()).await;

    let report = syncer.sync(true).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.count(FileAction::Added), 3);
    assert_eq!(report.chunks_written(), 0);
    assert_eq!(store.mutation_count(), 0);
    assert!(syncer.manifest().is_empty());
    assert!(!lib.manifest_path.exists());
}
