//! Command implementations
//!
//! Each module corresponds to a subcommand of the `agentic_rag` CLI.

pub mod ask;
pub mod docs;
pub mod ingest;
pub mod search;
pub mod status;
pub mod sync;

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::system::RagSystem;

/// Load configuration and build the system; fails fast on a bad config.
pub fn open_system(config_path: Option<&Path>) -> Result<RagSystem> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    RagSystem::open(config).context("Failed to start")
}

/// First `max` characters of `text` on one line.
pub(crate) fn one_line(text: &str, max: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    let mut clipped: String = flat.chars().take(max).collect();
    if flat.chars().count() > max {
        clipped.push('…');
    }
    clipped
}
