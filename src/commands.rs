//! CLI command implementations.
//!
//! Each `run_*` function backs one `libris` subcommand. They print
//! user-facing output to stdout; diagnostics go through `tracing` to stderr.

use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use libris_core::embedding::Embedder;
use libris_core::models::SearchResult;
use libris_core::store::VectorStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{preprocess, EmbeddingProvider};
use crate::generate::Generator;
use crate::manifest::Manifest;
use crate::retrieve::Retriever;
use crate::sqlite_store::SqliteStore;
use crate::sync::{self, FileAction, LibrarySync, SyncReport};

const SNIPPET_CHARS: usize = 240;

/// Open the embedder and the store, and make sure they agree.
async fn open_index(cfg: &Config) -> Result<(Arc<EmbeddingProvider>, Arc<SqliteStore>)> {
    let embedder = Arc::new(EmbeddingProvider::from_config(&cfg.embedding)?);
    let store = Arc::new(SqliteStore::open(&cfg.db.path).await?);
    store
        .check_embedder(embedder.model_name(), embedder.dims())
        .await?;
    Ok((embedder, store))
}

async fn open_sync(cfg: &Config) -> Result<(LibrarySync, Arc<SqliteStore>)> {
    let (embedder, store) = open_index(cfg).await?;
    let dyn_store: Arc<dyn VectorStore> = store.clone();
    let syncer = LibrarySync::from_config(cfg, embedder, dyn_store).await?;
    Ok((syncer, store))
}

pub async fn run_init(cfg: &Config) -> Result<()> {
    let (embedder, store) = open_index(cfg).await?;
    store.close().await;
    println!("Database initialized successfully.");
    println!(
        "  embedding: {} ({} dims)",
        embedder.model_name(),
        embedder.dims()
    );
    Ok(())
}

pub async fn run_sync(cfg: &Config, dry_run: bool) -> Result<()> {
    let (mut syncer, store) = open_sync(cfg).await?;

    let cancel = syncer.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current file");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    println!("sync: {}", cfg.library.root.display());
    let report = syncer.sync(dry_run).await?;
    print_report(&report);

    store.close().await;
    Ok(())
}

fn print_report(report: &SyncReport) {
    for file in &report.files {
        match &file.outcome {
            Ok(_) if report.dry_run => {
                println!("  would {:<7} {}", dry_run_verb(file.action), file.name)
            }
            Ok(chunks) => println!("  {:<9} {} ({} chunks)", file.action, file.name, chunks),
            Err(err) => println!("  FAILED    {} [{}]: {}", file.name, err.kind(), err),
        }
    }
    for err in &report.unreadable {
        println!("  FAILED    [{}]: {}", err.kind(), err);
    }

    let failed = report.failures().count();
    if report.dry_run {
        println!(
            "dry run: {} to add, {} to update, {} to remove, {} unchanged",
            report.count(FileAction::Added),
            report.count(FileAction::Updated),
            report.count(FileAction::Removed),
            report.unchanged.len()
        );
        return;
    }

    println!(
        "{} added, {} updated, {} removed, {} unchanged, {} failed, {} chunks written",
        report.count(FileAction::Added),
        report.count(FileAction::Updated),
        report.count(FileAction::Removed),
        report.unchanged.len(),
        failed,
        report.chunks_written()
    );
    if report.cancelled {
        println!("cancelled: remaining files will be indexed on the next sync");
    }
}

fn dry_run_verb(action: FileAction) -> &'static str {
    match action {
        FileAction::Added => "add",
        FileAction::Updated => "update",
        FileAction::Removed => "remove",
        FileAction::Reindexed => "reindex",
    }
}

pub async fn run_info(cfg: &Config) -> Result<()> {
    let manifest_path = cfg.manifest_path();
    let manifest = Manifest::load(&manifest_path).await;
    let store = SqliteStore::open(&cfg.db.path).await?;
    let stats = sync::library_stats(&manifest, &store).await?;
    store.close().await;

    println!("indexed files: {}", stats.indexed_files);
    println!("total chunks:  {}", stats.total_chunks);
    println!("library:       {}", cfg.library.root.display());
    println!("manifest:      {}", manifest_path.display());
    println!("database:      {}", cfg.db.path.display());

    if !manifest.is_empty() {
        println!();
        println!("{:<64}  file", "sha256");
        for (name, digest) in manifest.iter() {
            println!("{}  {}", digest, name);
        }
    }
    Ok(())
}

pub async fn run_reindex(cfg: &Config, file: &str) -> Result<()> {
    let (mut syncer, store) = open_sync(cfg).await?;
    let report = syncer.force_reindex(file).await?;
    store.close().await;

    match report.outcome {
        Ok(chunks) => {
            println!("reindexed {} ({} chunks)", report.name, chunks);
            Ok(())
        }
        Err(err) => anyhow::bail!("reindex failed [{}]: {}", err.kind(), err),
    }
}

pub async fn run_clear(cfg: &Config) -> Result<()> {
    let store = SqliteStore::open(&cfg.db.path).await?;
    sync::clear_index(&store, &cfg.manifest_path()).await?;
    store.close().await;
    println!("Index cleared.");
    Ok(())
}

pub async fn run_search(
    cfg: &Config,
    query: &str,
    expand: bool,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let (embedder, store) = open_index(cfg).await?;
    let retriever = Retriever::new(embedder, store.clone(), cfg.retrieval.dedup);

    let variants = if expand {
        let generator = Generator::from_config(&cfg.generation)?;
        generator
            .expand_query(query, cfg.retrieval.query_variants)
            .await?
    } else {
        vec![query.to_string()]
    };
    for variant in variants.iter().skip(1) {
        info!(variant = %variant, "query variant");
    }

    let results = retriever
        .search(&variants, cfg.retrieval.top_k, limit)
        .await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result);
    }
    Ok(())
}

fn print_result(rank: usize, result: &SearchResult) {
    let meta = &result.metadata;
    println!(
        "[{}] {:.4}  {} > {} (pp. {})  {} @ {}",
        rank,
        result.score,
        meta.source_title,
        meta.section_title,
        meta.page_range,
        meta.filename,
        meta.char_span
    );
    let snippet: String = preprocess(&result.content)
        .chars()
        .take(SNIPPET_CHARS)
        .collect();
    println!("    {}", snippet);
}

/// Line-oriented question loop on stdin. `exit`, `quit`, or EOF leaves.
pub async fn run_chat(cfg: &Config) -> Result<()> {
    let (embedder, store) = open_index(cfg).await?;
    let retriever = Retriever::new(embedder, store.clone(), cfg.retrieval.dedup);
    let generator = Generator::from_config(&cfg.generation)?;

    let interactive = atty::is(atty::Stream::Stdin);
    if interactive {
        println!("Ask about your library. Type `exit` to leave.");
        if !generator.is_enabled() {
            println!("(generation is disabled: showing matching passages)");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if interactive {
            print!("> ");
            std::io::stdout().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        match ask(&retriever, &generator, cfg, question).await {
            Ok(answer) => println!("{}\n", answer),
            Err(err) => eprintln!("error: {:#}", err),
        }
    }

    store.close().await;
    Ok(())
}

async fn ask(
    retriever: &Retriever,
    generator: &Generator,
    cfg: &Config,
    question: &str,
) -> Result<String> {
    let variants = generator
        .expand_query(question, cfg.retrieval.query_variants)
        .await?;
    let results = retriever
        .search(&variants, cfg.retrieval.top_k, None)
        .await?;
    generator.answer(question, &results).await
}
