//! Lowercase word tokenizer shared by BM25, the local embedder and the
//! relevance score.

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w']+").expect("token regex is valid"));

/// Lowercased word tokens in order of appearance (duplicates kept).
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Unique tokens of at least `min_chars` characters, first occurrence first.
pub fn unique_terms(text: &str, min_chars: usize) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(text) {
        if token.chars().count() >= min_chars && !terms.contains(&token) {
            terms.push(token);
        }
    }
    terms
}
