//! Vector store abstraction for Libris.
//!
//! The [`VectorStore`] trait covers everything the synchronizer and the
//! retrieval path need from a vector database, enabling pluggable backends
//! (SQLite in the app crate, in-memory here).
//!
//! Stores keep chunk metadata as a flat string map (see
//! [`ChunkMetadata::to_flat`](crate::models::ChunkMetadata::to_flat)).
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, SearchResult};

/// Abstract vector store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ingest`](VectorStore::ingest) | Add a batch of chunks with their vectors |
/// | [`delete_by_filename`](VectorStore::delete_by_filename) | Remove every chunk of one source file |
/// | [`query`](VectorStore::query) | k-nearest chunks for each query vector |
/// | [`count`](VectorStore::count) | Number of stored chunks |
/// | [`clear`](VectorStore::clear) | Remove everything |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Add chunks with one vector per chunk, in the same order.
    ///
    /// The batch is a single unit: either every chunk is stored or none is.
    async fn ingest(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    /// Delete every chunk whose `filename` metadata equals `filename`.
    ///
    /// Returns the number of chunks removed. Deleting an unknown file is
    /// not an error.
    async fn delete_by_filename(&self, filename: &str) -> Result<usize>;

    /// Return the `k` nearest chunks for each query vector, ranked by
    /// ascending L2 distance. The outer vec has one entry per query.
    async fn query(&self, vectors: &[Vec<f32>], k: usize) -> Result<Vec<Vec<SearchResult>>>;

    /// Number of chunks currently stored.
    async fn count(&self) -> Result<usize>;

    /// Remove every chunk.
    async fn clear(&self) -> Result<()>;
}

/// Reject batches where chunks and vectors do not line up.
pub fn check_batch(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        anyhow::bail!(
            "ingest batch mismatch: {} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        );
    }
    Ok(())
}
