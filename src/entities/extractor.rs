use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::external;
use crate::integrations::CompletionService;
use crate::prompts::Prompt;
use crate::{Error, Result};

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "and", "or", "but", "the", "a", "an", "of", "in", "on", "for", "to", "with", "how",
        "what", "when", "where", "which", "who", "whom", "why", "did", "does", "was", "were",
        "is", "are", "this", "that", "these", "those", "there", "then", "than", "its", "our",
        "their", "please", "tell",
    ]
    .into_iter()
    .collect()
});

/// Entity found in text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    /// Surface form as found
    pub text: String,
    /// Coarse type (person, organization, ...), `entity` when unknown
    #[serde(default = "default_class")]
    pub class: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

fn default_class() -> String {
    "entity".to_string()
}

impl ExtractedItem {
    pub fn new(text: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            class: class.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Entity extraction capability. An empty list is a valid outcome.
#[async_trait]
pub trait EntityExtraction: Send + Sync {
    async fn extract(&self, text: &str, instruction: &str) -> Result<Vec<ExtractedItem>>;
}

/// Surface heuristic: capitalised words, handles, hashtags and tokens with
/// digits, at least three characters, stopwords skipped. First occurrence
/// wins; comparison is case-insensitive.
pub fn heuristic_entities(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    for raw_token in text.split_whitespace() {
        let token = raw_token.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '#');
        if token.chars().count() < 3 {
            continue;
        }
        let normalized = token.to_lowercase();
        if STOPWORDS.contains(normalized.as_str()) {
            continue;
        }

        let is_candidate = token.chars().next().is_some_and(|c| c.is_uppercase())
            || token.contains('@')
            || token.contains('#')
            || token.chars().any(|c| c.is_numeric());

        if is_candidate && seen.insert(normalized) {
            entities.push(token.to_string());
        }
    }

    entities
}

/// Light-weight extractor with heuristics (no network calls).
#[derive(Debug, Default, Clone)]
pub struct HeuristicExtractor;

#[async_trait]
impl EntityExtraction for HeuristicExtractor {
    async fn extract(&self, text: &str, _instruction: &str) -> Result<Vec<ExtractedItem>> {
        Ok(heuristic_entities(text)
            .into_iter()
            .map(|name| ExtractedItem::new(name, default_class()))
            .collect())
    }
}

/// Asks the completion model for a JSON array of entities.
pub struct LlmExtractor {
    llm: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl LlmExtractor {
    pub fn new(llm: Arc<dyn CompletionService>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }
}

#[async_trait]
impl EntityExtraction for LlmExtractor {
    async fn extract(&self, text: &str, instruction: &str) -> Result<Vec<ExtractedItem>> {
        let system = Prompt::Extractor.system();
        let user = if instruction.trim().is_empty() {
            format!("TEXT:\n{}", text)
        } else {
            format!("{}\n\nTEXT:\n{}", instruction.trim(), text)
        };

        let reply = external::guarded("extract", self.timeout, self.llm.complete(&system, &user))
            .await
            .map_err(|e| Error::Extraction(e.to_string()))?;

        let items = parse_items(&reply);
        debug!(count = items.len(), "Extracted entities");
        Ok(items)
    }
}

/// Read the first JSON array in a reply; anything unreadable is no entities.
pub fn parse_items(reply: &str) -> Vec<ExtractedItem> {
    let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }

    let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(&reply[start..=end]) else {
        return Vec::new();
    };

    values
        .into_iter()
        .filter_map(|value| match value {
            serde_json::Value::String(text) => Some(ExtractedItem::new(text, default_class())),
            other => serde_json::from_value::<ExtractedItem>(other).ok(),
        })
        .filter(|item| !item.text.trim().is_empty())
        .collect()
}
