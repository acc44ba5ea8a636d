//! # Libris
//!
//! A local-first indexer for a folder of books and documents.
//!
//! Libris keeps a vector index in step with a library folder. Files are
//! identified by the SHA-256 of their bytes, so a sync only touches what
//! actually changed. Documents are cut into overlapping chunks that
//! remember their exact character span, section, and pages. Questions are
//! answered by searching with several rewordings at once and merging the
//! hits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌─────────┐   ┌────────┐   ┌──────────┐   ┌──────────┐
//! │ library │──▶│ detect  │──▶│ parser │──▶│ splitter │──▶│ embedder │
//! └─────────┘   └────┬────┘   └────────┘   └──────────┘   └────┬─────┘
//!                    ▼                                         ▼
//!               ┌──────────┐                              ┌─────────┐
//!               │ manifest │                              │  store  │
//!               └──────────┘                              └────┬────┘
//!                                                              ▼
//!                                  answer ◀── merge ◀── retrieve
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! libris init                         # create database
//! libris sync                         # index new and changed files
//! libris info                         # files and chunks indexed
//! libris search "the white whale"     # nearest chunks
//! libris chat                         # ask questions
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Per-file indexing errors |
//! | [`logging`] | Tracing subscriber setup |
//! | [`manifest`] | Persistent filename → digest map |
//! | [`library`] | File discovery |
//! | [`detect`] | Content-addressed change detection |
//! | [`parser`] | Markdown, text, and PDF parsing |
//! | [`http`] | Shared HTTP client with retry |
//! | [`embedding`] | Embedding providers |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`sync`] | Incremental synchronization |
//! | [`retrieve`] | Multi-query retrieval |
//! | [`generate`] | Query expansion and answers |
//! | [`commands`] | CLI command implementations |

pub mod commands;
pub mod config;
pub mod db;
pub mod detect;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod http;
pub mod library;
pub mod logging;
pub mod manifest;
pub mod migrate;
pub mod parser;
pub mod retrieve;
pub mod sqlite_store;
pub mod sync;

pub use libris_core as core;
