//! Multi-query result reconciliation.
//!
//! Retrieval issues several related query variants and gets one ranked list
//! per variant back from the store. [`merge_results`] flattens those lists,
//! drops duplicate chunk identifiers, and re-ranks by score.
//!
//! Scores follow the L2-distance convention: smaller means closer. The sort
//! is stable, so ties keep the order in which results were first encountered
//! (variant order, then rank within the variant).

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Deserialize;

use crate::models::SearchResult;

/// Which copy of a duplicated identifier survives the merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep the first occurrence in variant order, whatever its score.
    #[default]
    FirstSeen,
    /// Keep the lowest-scoring occurrence, positioned at its first encounter.
    BestScore,
}

/// Merge per-variant result lists into one deduplicated list sorted by score.
///
/// `limit` truncates the merged output when set. Empty input yields an
/// empty output.
pub fn merge_results(
    variants: Vec<Vec<SearchResult>>,
    policy: DedupPolicy,
    limit: Option<usize>,
) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for result in variants.into_iter().flatten() {
        match seen.get(&result.id) {
            None => {
                seen.insert(result.id.clone(), merged.len());
                merged.push(result);
            }
            Some(&slot) => {
                if policy == DedupPolicy::BestScore
                    && compare_scores(result.score, merged[slot].score) == Ordering::Less
                {
                    merged[slot] = result;
                }
            }
        }
    }

    merged.sort_by(|a, b| compare_scores(a.score, b.score));

    if let Some(limit) = limit {
        merged.truncate(limit);
    }
    merged
}

/// Ascending order with NaN sorted after every real score.
fn compare_scores(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}
