//! Exact nearest-neighbour index (cosine similarity) over chunk embeddings.

use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
pub struct DenseIndex {
    vectors: BTreeMap<String, Vec<f32>>,
}

impl DenseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Associate `vector` with a chunk, replacing any previous one.
    pub fn insert(&mut self, chunk_id: &str, vector: Vec<f32>) {
        self.vectors.insert(chunk_id.to_string(), vector);
    }

    pub fn remove(&mut self, chunk_id: &str) -> bool {
        self.vectors.remove(chunk_id).is_some()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Vec<f32>> {
        self.vectors.get(chunk_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<f32>)> {
        self.vectors.iter()
    }

    /// Top `limit` chunks by cosine similarity, best first. A zero query
    /// vector (failed embedding) matches nothing, and so do zero chunk
    /// vectors; only positive similarities are returned.
    pub fn search<F>(&self, query: &[f32], limit: usize, accept: F) -> Vec<(String, f32)>
    where
        F: Fn(&str) -> bool,
    {
        if limit == 0 || is_zero(query) {
            return Vec::new();
        }

        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .filter(|(id, _)| accept(id))
            .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }
}

pub fn is_zero(vector: &[f32]) -> bool {
    vector.iter().all(|v| *v == 0.0)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
