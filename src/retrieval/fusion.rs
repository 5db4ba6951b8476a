//! Reciprocal rank fusion of the sparse and dense ranklists.

use std::cmp::Ordering;
use std::collections::HashMap;

/// Rank offset: an item at 0-based rank `r` contributes `1 / (RRF_K + r + 1)`.
pub const RRF_K: f64 = 60.0;

/// Candidates fetched from each index for a final cut of `k`.
pub fn candidate_count(k: usize) -> usize {
    (2 * k).max(10)
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    score: f64,
    sparse_rank: Option<usize>,
    dense_rank: Option<usize>,
}

/// Fuse two ranklists of chunk ids.
///
/// Sorted by fused score, descending. Equal scores fall back to the sparse
/// rank (ids missing from the sparse list after all present ones), then
/// the dense rank, then the id itself.
pub fn rrf_fuse(sparse: &[String], dense: &[String]) -> Vec<(String, f64)> {
    let mut entries: HashMap<&str, Entry> = HashMap::new();

    for (rank, id) in sparse.iter().enumerate() {
        let entry = entries.entry(id.as_str()).or_insert(Entry {
            score: 0.0,
            sparse_rank: None,
            dense_rank: None,
        });
        if entry.sparse_rank.is_none() {
            entry.sparse_rank = Some(rank);
            entry.score += contribution(rank);
        }
    }

    for (rank, id) in dense.iter().enumerate() {
        let entry = entries.entry(id.as_str()).or_insert(Entry {
            score: 0.0,
            sparse_rank: None,
            dense_rank: None,
        });
        if entry.dense_rank.is_none() {
            entry.dense_rank = Some(rank);
            entry.score += contribution(rank);
        }
    }

    let mut fused: Vec<(&str, Entry)> = entries.into_iter().collect();
    fused.sort_by(|(id_a, a), (id_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| rank_order(a.sparse_rank, b.sparse_rank))
            .then_with(|| rank_order(a.dense_rank, b.dense_rank))
            .then_with(|| id_a.cmp(id_b))
    });

    fused
        .into_iter()
        .map(|(id, entry)| (id.to_string(), entry.score))
        .collect()
}

fn contribution(rank: usize) -> f64 {
    1.0 / (RRF_K + rank as f64 + 1.0)
}

/// Present ranks first (ascending), absent last.
fn rank_order(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
