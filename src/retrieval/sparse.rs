//! BM25 lexical index over chunks.

use std::collections::{BTreeMap, HashMap};

use super::tokenizer::tokenize;

/// Term-frequency saturation.
pub const BM25_K1: f64 = 1.2;
/// Length normalisation.
pub const BM25_B: f64 = 0.75;

#[derive(Debug, Default, Clone)]
pub struct SparseIndex {
    /// term -> chunk_id -> term frequency
    postings: HashMap<String, BTreeMap<String, u32>>,
    /// chunk_id -> token count
    lengths: BTreeMap<String, usize>,
    total_tokens: usize,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Index a chunk, replacing any previous text under the same id.
    pub fn insert(&mut self, chunk_id: &str, text: &str) {
        self.remove(chunk_id);

        let tokens = tokenize(text);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_insert(0) += 1;
        }
        for (term, tf) in counts {
            self.postings
                .entry(term)
                .or_default()
                .insert(chunk_id.to_string(), tf);
        }
        self.total_tokens += tokens.len();
        self.lengths.insert(chunk_id.to_string(), tokens.len());
    }

    /// Drop a chunk. Returns false if it was not indexed.
    pub fn remove(&mut self, chunk_id: &str) -> bool {
        let Some(len) = self.lengths.remove(chunk_id) else {
            return false;
        };
        self.total_tokens -= len;
        self.postings.retain(|_, docs| {
            docs.remove(chunk_id);
            !docs.is_empty()
        });
        true
    }

    /// Top `limit` chunks with a positive BM25 score, best first; equal
    /// scores are ordered by chunk id. `accept` filters candidates before
    /// the cut-off.
    pub fn search<F>(&self, query: &str, limit: usize, accept: F) -> Vec<(String, f64)>
    where
        F: Fn(&str) -> bool,
    {
        if limit == 0 || self.is_empty() {
            return Vec::new();
        }

        let n = self.lengths.len() as f64;
        let avg_len = (self.total_tokens as f64 / n).max(1.0);

        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        let mut scores: BTreeMap<&str, f64> = BTreeMap::new();
        for term in &terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for (chunk_id, tf) in docs {
                if !accept(chunk_id) {
                    continue;
                }
                let tf = *tf as f64;
                let len = self.lengths.get(chunk_id).copied().unwrap_or(0) as f64;
                let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len);
                *scores.entry(chunk_id.as_str()).or_insert(0.0) +=
                    idf * tf * (BM25_K1 + 1.0) / (tf + norm);
            }
        }

        let mut ranked: Vec<(String, f64)> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(id, score)| (id.to_string(), score))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }
}
