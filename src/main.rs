//! # Libris CLI (`libris`)
//!
//! ## Usage
//!
//! ```bash
//! libris --config ./config/libris.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `libris init` | Create the SQLite database and run schema migrations |
//! | `libris sync` | Index new and changed files, drop removed ones |
//! | `libris info` | Show indexed file and chunk counts |
//! | `libris reindex <file>` | Re-index one file regardless of its digest |
//! | `libris clear` | Empty the index and the manifest |
//! | `libris search "<query>"` | Nearest chunks for a query |
//! | `libris chat` | Question loop over the library |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use libris::{commands, config, logging};

/// Libris: a local-first indexer and search tool for your books.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/libris.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "libris",
    about = "Libris: incremental indexing and multi-query search over a folder of books",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/libris.toml")]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Bring the index in line with the library folder.
    ///
    /// Unchanged files are skipped by content digest. A file that fails is
    /// reported and retried on the next sync. Ctrl-C stops after the
    /// current file.
    Sync {
        /// Show what would change without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show how many files and chunks are indexed.
    Info,

    /// Re-index one file, ignoring its recorded digest.
    Reindex {
        /// Path relative to the library root, `/`-separated.
        file: String,
    },

    /// Delete every chunk and reset the manifest.
    Clear,

    /// Search the index.
    Search {
        /// The search query string.
        query: String,

        /// Also search with generated rewordings of the query.
        #[arg(long)]
        variants: bool,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask questions about the library (reads stdin).
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Sync { dry_run } => commands::run_sync(&cfg, dry_run).await?,
        Commands::Info => commands::run_info(&cfg).await?,
        Commands::Reindex { file } => commands::run_reindex(&cfg, &file).await?,
        Commands::Clear => commands::run_clear(&cfg).await?,
        Commands::Search {
            query,
            variants,
            limit,
            json,
        } => commands::run_search(&cfg, &query, variants, limit, json).await?,
        Commands::Chat => commands::run_chat(&cfg).await?,
    }

    Ok(())
}
