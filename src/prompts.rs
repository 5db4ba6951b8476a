//! System prompts for the agents.
//!
//! Built-in texts live here; a Markdown file with the same name in
//! `prompts/` (next to the working directory or one of its parents)
//! replaces the built-in text. Overrides should keep the first
//! "You are the ..." line, the offline stand-in keys off it.

use std::path::PathBuf;

use crate::{Error, Result};

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Picks a retrieval strategy.
    Router,
    /// Orders a batch of snippets.
    Reranker,
    /// Improves a query that under-performed.
    Rewriter,
    /// Writes the cited answer.
    Writer,
    /// Lists named entities as JSON.
    Extractor,
}

pub const ROUTER_ROLE: &str = "You are the Router";
pub const RERANKER_ROLE: &str = "You are the Reranker";
pub const REWRITER_ROLE: &str = "You are the Query Rewriter";
pub const WRITER_ROLE: &str = "You are the Writer";
pub const EXTRACTOR_ROLE: &str = "You are the Entity Extractor";

impl Prompt {
    /// Prompt file name (Markdown).
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::Router => "router.md",
            Prompt::Reranker => "reranker.md",
            Prompt::Rewriter => "rewriter.md",
            Prompt::Writer => "writer.md",
            Prompt::Extractor => "extractor.md",
        }
    }

    /// Built-in prompt text.
    pub fn builtin(&self) -> &'static str {
        match self {
            Prompt::Router => concat!(
                "You are the Router of a document retrieval system.\n",
                "Choose exactly one retrieval strategy for the question: ",
                "HYBRID (keywords + meaning), ENTITIES (named people, companies, places, dates), ",
                "VECTOR (paraphrased or conceptual questions) or BM25 (exact terms, codes, identifiers).\n",
                "Reply with the strategy name only."
            ),
            Prompt::Reranker => concat!(
                "You are the Reranker.\n",
                "Order the numbered snippets from most to least relevant to the question.\n",
                "Reply with the numbers only, comma-separated, e.g. 3,1,2."
            ),
            Prompt::Rewriter => concat!(
                "You are the Query Rewriter of a search system.\n",
                "Rewrite the search query so the next search finds better evidence.\n",
                "Reply with the new query on a single line and nothing else."
            ),
            Prompt::Writer => concat!(
                "You are the Writer.\n",
                "Answer the question strictly from the CONTEXT blocks. ",
                "Cite every fact with its source as [doc_id]. ",
                "If the context does not contain the answer, say so. Do not invent facts."
            ),
            Prompt::Extractor => concat!(
                "You are the Entity Extractor.\n",
                "Return a JSON array of objects {\"text\": ..., \"class\": ...} for every ",
                "person, organization, place, date and amount of money in the text. ",
                "Copy entity text verbatim. Return [] when there are none."
            ),
        }
    }

    /// Load the override file if present, the built-in text otherwise.
    pub fn system(&self) -> String {
        load_prompt(self.filename()).unwrap_or_else(|_| self.builtin().to_string())
    }
}

/// Load a prompt by file name.
pub fn load_prompt(filename: &str) -> Result<String> {
    let path = prompts_dir().join(filename);
    std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgument(format!("Could not load prompt {}: {}", filename, e))
    })
}

/// Path to the prompts directory.
pub fn prompts_dir() -> PathBuf {
    let candidates = [
        PathBuf::from("prompts"),
        PathBuf::from("../prompts"),
        PathBuf::from("../../prompts"),
    ];

    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("prompts")
}

/// All prompts.
pub fn list_prompts() -> Vec<Prompt> {
    vec![
        Prompt::Router,
        Prompt::Reranker,
        Prompt::Rewriter,
        Prompt::Writer,
        Prompt::Extractor,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_prompts_start_with_role_line() {
        let roles = [
            (Prompt::Router, ROUTER_ROLE),
            (Prompt::Reranker, RERANKER_ROLE),
            (Prompt::Rewriter, REWRITER_ROLE),
            (Prompt::Writer, WRITER_ROLE),
            (Prompt::Extractor, EXTRACTOR_ROLE),
        ];
        for (prompt, role) in roles {
            assert!(prompt.builtin().starts_with(role), "{:?}", prompt);
        }
    }

    #[test]
    fn filenames_are_unique_markdown() {
        let mut names: Vec<&str> = list_prompts().iter().map(|p| p.filename()).collect();
        assert!(names.iter().all(|n| n.ends_with(".md")));
        names.sort();
        names.dedup();
        assert_eq!(names.len(), list_prompts().len());
    }

    #[test]
    fn missing_override_falls_back_to_builtin() {
        assert!(load_prompt("definitely_missing_prompt.md").is_err());
        let text = Prompt::Writer.system();
        assert!(text.contains("[doc_id]"));
    }

    #[test]
    fn router_prompt_lists_every_strategy() {
        let text = Prompt::Router.builtin();
        for name in ["HYBRID", "ENTITIES", "VECTOR", "BM25"] {
            assert!(text.contains(name));
        }
    }
}
