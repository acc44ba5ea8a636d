//! SQLite-backed [`VectorStore`].
//!
//! Chunks live in one `chunks` table. Metadata is the flat JSON map from
//! [`ChunkMetadata::to_flat`], with page ranges and spans as `"start-end"`
//! strings; embeddings are little-endian f32 blobs. Queries load every
//! vector and rank by exact L2 distance in Rust.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use libris_core::embedding::{blob_to_vec, l2_distance, vec_to_blob};
use libris_core::models::{Chunk, ChunkMetadata, SearchResult};
use libris_core::store::{check_batch, VectorStore};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Make sure stored vectors came from the same embedder.
    ///
    /// An empty index adopts `model`/`dims`. A non-empty index built with a
    /// different embedder is an error: its distances would be meaningless.
    pub async fn check_embedder(&self, model: &str, dims: usize) -> Result<()> {
        let stored_model: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'embedding_model'")
                .fetch_optional(&self.pool)
                .await?;
        let stored_dims: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'embedding_dims'")
                .fetch_optional(&self.pool)
                .await?;

        let dims_text = dims.to_string();
        let matches = stored_model.as_deref() == Some(model)
            && stored_dims.as_deref() == Some(dims_text.as_str());
        if matches {
            return Ok(());
        }

        if stored_model.is_some() && self.count().await? > 0 {
            bail!(
                "index was built with embedding model '{}' ({} dims), config now uses '{}' ({} dims); run `libris clear` first",
                stored_model.unwrap_or_default(),
                stored_dims.unwrap_or_default(),
                model,
                dims
            );
        }

        for (key, value) in [("embedding_model", model), ("embedding_dims", dims_text.as_str())] {
            sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn ingest(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        check_batch(chunks, vectors)?;
        let mut tx = self.pool.begin().await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let metadata = serde_json::to_string(&Value::Object(chunk.metadata.to_flat()))?;
            sqlx::query(
                "INSERT OR REPLACE INTO chunks (id, filename, content, metadata_json, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.metadata.chunk_id)
            .bind(&chunk.metadata.filename)
            .bind(&chunk.content)
            .bind(metadata)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE filename = ?")
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn query(&self, vectors: &[Vec<f32>], k: usize) -> Result<Vec<Vec<SearchResult>>> {
        let rows = sqlx::query("SELECT id, content, metadata_json, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        let stored: Vec<(String, String, String, Vec<f32>)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (
                    row.get("id"),
                    row.get("content"),
                    row.get("metadata_json"),
                    blob_to_vec(&blob),
                )
            })
            .collect();

        let mut out = Vec::with_capacity(vectors.len());
        for query in vectors {
            let mut scored: Vec<(f32, usize)> = stored
                .iter()
                .enumerate()
                .map(|(i, row)| (l2_distance(query, &row.3), i))
                .collect();
            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);

            let mut results = Vec::with_capacity(scored.len());
            for (score, i) in scored {
                let (id, content, metadata_json, _) = &stored[i];
                let flat: Map<String, Value> = serde_json::from_str(metadata_json)
                    .with_context(|| format!("corrupt metadata for chunk {}", id))?;
                results.push(SearchResult {
                    id: id.clone(),
                    content: content.clone(),
                    metadata: ChunkMetadata::from_flat(&flat)
                        .with_context(|| format!("corrupt metadata for chunk {}", id))?,
                    score,
                });
            }
            out.push(results);
        }

        Ok(out)
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
