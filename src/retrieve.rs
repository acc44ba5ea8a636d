//! Multi-query retrieval.
//!
//! Every query variant is embedded in one batch and sent to the store in
//! one call; the per-variant neighbor lists are then merged into a single
//! ranked, duplicate-free list.

use std::sync::Arc;

use anyhow::Result;
use libris_core::embedding::Embedder;
use libris_core::merge::{merge_results, DedupPolicy};
use libris_core::models::SearchResult;
use libris_core::store::VectorStore;
use tracing::debug;

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    policy: DedupPolicy,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, policy: DedupPolicy) -> Self {
        Self {
            embedder,
            store,
            policy,
        }
    }

    /// The `k` nearest chunks for each variant, merged.
    ///
    /// The result holds at most `k × variants.len()` entries, further
    /// capped by `limit`.
    pub async fn search(
        &self,
        variants: &[String],
        k: usize,
        limit: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        if variants.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed_batch(variants).await?;
        let per_variant = self.store.query(&vectors, k).await?;
        debug!(
            variants = variants.len(),
            hits = per_variant.iter().map(Vec::len).sum::<usize>(),
            "retrieved"
        );

        Ok(merge_results(per_variant, self.policy, limit))
    }
}
