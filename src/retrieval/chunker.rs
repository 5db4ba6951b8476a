use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_CHUNK_MAX_CHARS, DEFAULT_CHUNK_MIN_CHARS};

static PARAGRAPH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\r]*\n").expect("paragraph regex is valid"));
static SENTENCE_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+[\s]+").expect("sentence regex is valid"));

const PARAGRAPH_JOINER: &str = "\n\n";
const WORD_JOINER: &str = " ";

/// Text chunk produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `<doc_id>#<position>`, stable across re-ingestion
    pub chunk_id: String,
    /// Owning document
    pub doc_id: String,
    /// Raw text of the chunk
    pub text: String,
    /// 0-based index inside the document
    pub position: usize,
}

impl Chunk {
    pub fn new(doc_id: &str, position: usize, text: String) -> Self {
        Self {
            chunk_id: chunk_id(doc_id, position),
            doc_id: doc_id.to_string(),
            text,
            position,
        }
    }
}

pub fn chunk_id(doc_id: &str, position: usize) -> String {
    format!("{doc_id}#{position}")
}

/// Paragraph-aware chunker with character bounds.
///
/// Paragraphs are packed together until the next one would overflow
/// `max_chars`. A paragraph longer than `max_chars` is cut at sentence
/// ends, an over-long sentence into words, and a word longer than
/// `max_chars - min_chars - 1` into fixed character runs. Every chunk is at
/// most `max_chars`; only the last chunk of a document may be shorter
/// than `min_chars`.
#[derive(Debug, Clone)]
pub struct Chunker {
    min_chars: usize,
    max_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_MIN_CHARS, DEFAULT_CHUNK_MAX_CHARS)
    }
}

/// Piece of text to pack, and whether it opens a paragraph.
struct Unit<'a> {
    text: &'a str,
    starts_paragraph: bool,
}

impl Chunker {
    /// Create a new chunker. `max_chars` is raised above `min_chars` if needed.
    pub fn new(min_chars: usize, max_chars: usize) -> Self {
        let max_chars = max_chars.max(min_chars + 2);
        Self {
            min_chars,
            max_chars,
        }
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Chunk a document.
    pub fn chunk(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(position, text)| Chunk::new(doc_id, position, text))
            .collect()
    }

    /// Split text into chunk texts.
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut packer = Packer::new(self.min_chars, self.max_chars);

        for paragraph in PARAGRAPH_RE.split(text) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            for unit in self.paragraph_units(paragraph) {
                packer.push(unit);
            }
        }

        packer.finish()
    }

    fn paragraph_units<'a>(&self, paragraph: &'a str) -> Vec<Unit<'a>> {
        if char_len(paragraph) <= self.max_chars {
            return vec![Unit {
                text: paragraph,
                starts_paragraph: true,
            }];
        }

        let mut units = Vec::new();
        for sentence in split_sentences(paragraph) {
            let starts_paragraph = units.is_empty();
            if char_len(sentence) <= self.max_chars {
                units.push(Unit {
                    text: sentence,
                    starts_paragraph,
                });
                continue;
            }
            for (idx, word) in sentence.split_whitespace().enumerate() {
                units.push(Unit {
                    text: word,
                    starts_paragraph: starts_paragraph && idx == 0,
                });
            }
        }
        units
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END_RE.find_iter(paragraph) {
        let sentence = paragraph[start..m.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }
    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Cut `word` into runs of at most `limit` characters.
fn split_chars(word: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in word.char_indices() {
        if count == limit {
            pieces.push(&word[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < word.len() {
        pieces.push(&word[start..]);
    }
    pieces
}

/// Greedy accumulator behind [`Chunker::split`].
struct Packer {
    min_chars: usize,
    max_chars: usize,
    buffer: String,
    buffer_chars: usize,
    chunks: Vec<String>,
}

impl Packer {
    fn new(min_chars: usize, max_chars: usize) -> Self {
        Self {
            min_chars,
            max_chars,
            buffer: String::new(),
            buffer_chars: 0,
            chunks: Vec::new(),
        }
    }

    /// Longest word piece that always fits into a buffer still below
    /// `min_chars`, paragraph joiner included.
    fn word_limit(&self) -> usize {
        (self.max_chars - self.min_chars - 1).max(1)
    }

    fn push(&mut self, unit: Unit<'_>) {
        if self.fits(unit.text, unit.starts_paragraph) {
            self.append(unit.text, unit.starts_paragraph);
        } else if !self.buffer.is_empty() && self.buffer_chars >= self.min_chars {
            self.flush();
            self.push(unit);
        } else {
            self.spill(unit);
        }
    }

    /// Add a unit word by word (used while the buffer is still too short).
    fn spill(&mut self, unit: Unit<'_>) {
        let limit = self.word_limit();
        let mut first = unit.starts_paragraph;
        for word in unit.text.split_whitespace() {
            for piece in split_chars(word, limit) {
                if !self.fits(piece, first) {
                    self.flush();
                }
                self.append(piece, first);
                first = false;
            }
        }
    }

    fn joiner(&self, starts_paragraph: bool) -> &'static str {
        if self.buffer.is_empty() {
            ""
        } else if starts_paragraph {
            PARAGRAPH_JOINER
        } else {
            WORD_JOINER
        }
    }

    fn fits(&self, text: &str, starts_paragraph: bool) -> bool {
        self.buffer_chars + self.joiner(starts_paragraph).len() + char_len(text) <= self.max_chars
    }

    fn append(&mut self, text: &str, starts_paragraph: bool) {
        let joiner = self.joiner(starts_paragraph);
        self.buffer.push_str(joiner);
        self.buffer.push_str(text);
        self.buffer_chars += joiner.len() + char_len(text);
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.chunks.push(std::mem::take(&mut self.buffer));
            self.buffer_chars = 0;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(words: usize) -> String {
        let mut s = vec!["word"; words].join(" ");
        s.push('.');
        s
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk("acme", "ACME earned $12M in Q2.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "ACME earned $12M in Q2.");
        assert_eq!(chunks[0].chunk_id, "acme#0");
        assert_eq!(chunks[0].position, 0);
    }

    #[test]
    fn empty_text_returns_empty() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("d", "").is_empty());
        assert!(chunker.chunk("d", "   \t\n\n  ").is_empty());
    }

    #[test]
    fn paragraphs_are_packed_until_max() {
        let chunker = Chunker::new(20, 60);
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one is a little longer.";
        let chunks = chunker.split(text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "First paragraph here.\n\nSecond paragraph here.");
        assert_eq!(chunks[1], "Third one is a little longer.");
    }

    #[test]
    fn short_buffer_keeps_accumulating() {
        let chunker = Chunker::new(30, 40);
        let text = "Tiny.\n\nThis paragraph is long enough to overflow it.";
        let chunks = chunker.split(text);

        assert!(chunks[0].starts_with("Tiny.\n\nThis"));
        for chunk in &chunks[..chunks.len() - 1] {
            let len = chunk.chars().count();
            assert!(len >= 30 && len <= 40, "{len}: {chunk:?}");
        }
    }

    #[test]
    fn long_paragraph_splits_on_sentences() {
        let chunker = Chunker::new(50, 100);
        let paragraph = [sentence(10), sentence(10), sentence(10), sentence(10)].join(" ");
        let chunks = chunker.split(&paragraph);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.ends_with('.'), "{chunk:?}");
            assert!(chunk.chars().count() <= 100);
        }
    }

    #[test]
    fn bounds_hold_for_mixed_input() {
        let chunker = Chunker::new(200, 1000);
        let mut text = String::new();
        for i in 0..30 {
            text.push_str(&sentence(5 + (i * 7) % 60));
            text.push_str(if i % 4 == 0 { "\n\n" } else { " " });
        }
        text.push_str(&"x".repeat(2500));

        let chunks = chunker.split(&text);
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let len = chunk.chars().count();
            assert!(len <= 1000, "chunk {i} has {len} chars");
            if i != last {
                assert!(len >= 200, "chunk {i} has {len} chars");
            }
        }
    }

    #[test]
    fn chunks_preserve_all_words_in_order() {
        let chunker = Chunker::new(40, 80);
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi rho sigma tau.\n\nUpsilon phi chi psi omega.";
        let joined = chunker.split(text).join(" ");

        let original: Vec<&str> = text.split_whitespace().collect();
        let rebuilt: Vec<&str> = joined.split_whitespace().collect();
        assert_eq!(original, rebuilt);
    }

    #[test]
    fn oversized_word_is_cut_into_runs() {
        let chunker = Chunker::new(10, 30);
        let chunks = chunker.split(&"é".repeat(75));

        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
        assert_eq!(chunks.iter().map(|c| c.chars().count()).sum::<usize>(), 75);
    }

    #[test]
    fn split_chars_respects_limit() {
        assert_eq!(split_chars("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(split_chars("ab", 3), vec!["ab"]);
    }

    #[test]
    fn positions_are_sequential() {
        let chunker = Chunker::new(10, 20);
        let chunks = chunker.chunk("doc", "one two three four five six seven eight nine ten");
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i);
            assert_eq!(chunk.chunk_id, format!("doc#{i}"));
            assert_eq!(chunk.doc_id, "doc");
        }
    }

    #[test]
    fn new_keeps_max_above_min() {
        let chunker = Chunker::new(50, 10);
        assert!(chunker.max_chars() > chunker.min_chars());
    }
}
