//! In-memory [`VectorStore`] implementation for tests and small libraries.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`. Metadata is kept in the
//! same flat encoding a real vector database would use, and decoded on read.
//! Queries are brute-force exact L2 over every stored vector.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::embedding::l2_distance;
use crate::models::{Chunk, ChunkMetadata, SearchResult};

use super::{check_batch, VectorStore};

struct StoredRow {
    id: String,
    content: String,
    metadata: Map<String, Value>,
    vector: Vec<f32>,
}

impl StoredRow {
    fn filename(&self) -> Option<&str> {
        self.metadata.get("filename").and_then(Value::as_str)
    }
}

/// In-memory vector store.
///
/// Counts every mutating call ([`ingest`](VectorStore::ingest),
/// [`delete_by_filename`](VectorStore::delete_by_filename),
/// [`clear`](VectorStore::clear)) so callers can assert that a pass
/// left the store alone.
#[derive(Default)]
pub struct InMemoryStore {
    rows: RwLock<Vec<StoredRow>>,
    mutations: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls made so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Chunk ids stored for `filename`, in insertion order.
    pub fn ids_for(&self, filename: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .iter()
            .filter(|row| row.filename() == Some(filename))
            .map(|row| row.id.clone())
            .collect())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<StoredRow>>> {
        self.rows
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<StoredRow>>> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.rows
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn ingest(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        check_batch(chunks, vectors)?;
        let mut rows = self.write()?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            rows.retain(|row| row.id != chunk.metadata.chunk_id);
            rows.push(StoredRow {
                id: chunk.metadata.chunk_id.clone(),
                content: chunk.content.clone(),
                metadata: chunk.metadata.to_flat(),
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<usize> {
        let mut rows = self.write()?;
        let before = rows.len();
        rows.retain(|row| row.filename() != Some(filename));
        Ok(before - rows.len())
    }

    async fn query(&self, vectors: &[Vec<f32>], k: usize) -> Result<Vec<Vec<SearchResult>>> {
        let rows = self.read()?;
        let mut out = Vec::with_capacity(vectors.len());

        for query in vectors {
            let mut scored: Vec<(f32, &StoredRow)> = rows
                .iter()
                .map(|row| (l2_distance(query, &row.vector), row))
                .collect();
            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);

            let results = scored
                .into_iter()
                .map(|(score, row)| {
                    Ok(SearchResult {
                        id: row.id.clone(),
                        content: row.content.clone(),
                        metadata: ChunkMetadata::from_flat(&row.metadata)?,
                        score,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            out.push(results);
        }

        Ok(out)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn clear(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CharSpan, PageRange};

    fn chunk(id: &str, filename: &str, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            metadata: ChunkMetadata {
                chunk_id: id.to_string(),
                filename: filename.to_string(),
                source_title: "Title".into(),
                section_title: "Section".into(),
                page_range: PageRange::new(2, 3),
                char_span: CharSpan::new(10, 20),
            },
        }
    }

    #[tokio::test]
    async fn test_ingest_query_ranked_by_distance() {
        let store = InMemoryStore::new();
        store
            .ingest(
                &[chunk("a", "x.md", "alpha"), chunk("b", "x.md", "beta")],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .await
            .unwrap();

        let results = store
            .query(&[vec![0.1, 0.9], vec![1.0, 0.0]], 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0][0].id, "b");
        assert_eq!(results[0][1].id, "a");
        assert_eq!(results[1][0].id, "a");
        assert_eq!(results[1][0].score, 0.0);
        assert_eq!(results[1][0].metadata.page_range, PageRange::new(2, 3));
    }

    #[tokio::test]
    async fn test_query_truncates_to_k() {
        let store = InMemoryStore::new();
        let chunks: Vec<_> = (0..5).map(|i| chunk(&i.to_string(), "f", "t")).collect();
        let vectors: Vec<_> = (0..5).map(|i| vec![i as f32]).collect();
        store.ingest(&chunks, &vectors).await.unwrap();
        let results = store.query(&[vec![0.0]], 3).await.unwrap();
        assert_eq!(results[0].len(), 3);
    }

    #[tokio::test]
    async fn test_ingest_rejects_mismatched_batch() {
        let store = InMemoryStore::new();
        let err = store
            .ingest(&[chunk("a", "x", "t")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mismatch"));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_filename_and_clear() {
        let store = InMemoryStore::new();
        store
            .ingest(
                &[
                    chunk("a", "one.md", "a"),
                    chunk("b", "two.md", "b"),
                    chunk("c", "one.md", "c"),
                ],
                &[vec![0.0], vec![1.0], vec![2.0]],
            )
            .await
            .unwrap();

        assert_eq!(store.delete_by_filename("one.md").await.unwrap(), 2);
        assert_eq!(store.delete_by_filename("missing.md").await.unwrap(), 0);
        assert_eq!(store.ids_for("two.md").unwrap(), vec!["b".to_string()]);
        assert_eq!(store.count().await.unwrap(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.mutation_count(), 4);
    }
}
