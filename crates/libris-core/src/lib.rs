//! # Libris Core
//!
//! Shared, I/O-free logic for Libris: document and chunk models, the
//! position-preserving chunk splitter, multi-query result merging, and the
//! store and embedder abstractions.
//!
//! This crate contains no tokio, sqlx, filesystem or network code. The
//! application crate supplies concrete parsers, embedders and stores.

pub mod chunk;
pub mod embedding;
pub mod merge;
pub mod models;
pub mod store;
