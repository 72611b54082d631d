use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::Number;
use crate::vector_entry::{IndexEntry, Metadata, SOURCE_KEY};
use crate::vector_ops::squared_l2_simd;

/// One ranked hit. `score` is the squared Euclidean distance to the query,
/// so lower is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub metadata: Metadata,
    pub score: Number,
}

impl SearchResult {
    pub fn from_entry(entry: &IndexEntry, score: Number) -> Self {
        Self {
            text: entry.text.clone(),
            metadata: entry.metadata.clone(),
            score,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// Exhaustive scan over a flat, row-major vector array. Returns
/// `(position, distance)` for the `k` closest rows.
pub fn exact_search(
    vectors: &[Number],
    dimension: usize,
    query: &[Number],
    k: usize,
) -> Vec<(usize, Number)> {
    if dimension == 0 || k == 0 || vectors.is_empty() {
        return Vec::new();
    }

    let scored: Vec<(usize, Number)> = vectors
        .par_chunks_exact(dimension)
        .enumerate()
        .map(|(i, vector)| (i, squared_l2_simd(query, vector).unwrap_or(Number::INFINITY)))
        .collect();

    sort_and_limit_results(scored, k)
}

/// Ascending by distance; equal distances keep insertion order.
pub fn sort_and_limit_results(
    mut results: Vec<(usize, Number)>,
    limit: usize,
) -> Vec<(usize, Number)> {
    results.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    results.truncate(limit);
    results
}
