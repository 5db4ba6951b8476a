use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::extractor::ExtractedItem;
use crate::{Error, Result};

pub const GRAPH_FILE: &str = "graph_index.json";

/// Entity → documents index used to filter entity-driven searches.
///
/// Keys are trimmed and lowercased. With a data directory every change is
/// written to `graph_index.json` as pretty JSON.
#[derive(Debug, Default, Clone)]
pub struct EntityGraph {
    entities: BTreeMap<String, BTreeSet<String>>,
    path: Option<PathBuf>,
}

pub fn normalize(entity: &str) -> String {
    entity.trim().to_lowercase()
}

impl EntityGraph {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load `<data_dir>/graph_index.json`, starting empty when it is absent.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(GRAPH_FILE);
        let entities = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                Error::Persistence(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            entities,
            path: Some(path),
        })
    }

    /// Number of distinct entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Record that `doc_id` mentions every item.
    pub fn update_from_items(&mut self, doc_id: &str, items: &[ExtractedItem]) -> Result<()> {
        let mut staged = self.entities.clone();
        add_items(&mut staged, doc_id, items);
        self.commit(staged)
    }

    /// Documents mentioning any of `entities`.
    pub fn filter_docs(&self, entities: &[String]) -> BTreeSet<String> {
        entities
            .iter()
            .filter_map(|entity| self.entities.get(&normalize(entity)))
            .flat_map(|docs| docs.iter().cloned())
            .collect()
    }

    /// Forget a document; entities left without documents disappear.
    pub fn remove_doc(&mut self, doc_id: &str) -> Result<()> {
        let mut staged = self.entities.clone();
        drop_doc(&mut staged, doc_id);
        self.commit(staged)
    }

    /// Swap the entities of `doc_id` for `items` with a single write.
    pub fn replace_doc(&mut self, doc_id: &str, items: &[ExtractedItem]) -> Result<()> {
        let mut staged = self.entities.clone();
        drop_doc(&mut staged, doc_id);
        add_items(&mut staged, doc_id, items);
        self.commit(staged)
    }

    /// Persist `staged`, then adopt it. A failed write keeps the old map.
    fn commit(&mut self, staged: BTreeMap<String, BTreeSet<String>>) -> Result<()> {
        if staged == self.entities {
            return Ok(());
        }
        self.save(&staged)?;
        self.entities = staged;
        Ok(())
    }

    fn save(&self, entities: &BTreeMap<String, BTreeSet<String>>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(entities)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        if let Err(err) = fs::rename(&tmp, path) {
            warn!(path = %path.display(), "Failed to replace entity graph: {}", err);
            return Err(err.into());
        }
        debug!(entities = entities.len(), "Entity graph saved");
        Ok(())
    }
}

fn add_items(entities: &mut BTreeMap<String, BTreeSet<String>>, doc_id: &str, items: &[ExtractedItem]) {
    for item in items {
        let key = normalize(&item.text);
        if key.is_empty() {
            continue;
        }
        entities.entry(key).or_default().insert(doc_id.to_string());
    }
}

fn drop_doc(entities: &mut BTreeMap<String, BTreeSet<String>>, doc_id: &str) {
    entities.retain(|_, docs| {
        docs.remove(doc_id);
        !docs.is_empty()
    });
}
