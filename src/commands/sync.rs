//! Sync folders of text files into the corpus

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::sync::{DataSource, FolderSource};
use crate::system::RagSystem;

pub async fn run(system: &RagSystem, specs: &[String]) -> Result<()> {
    if specs.is_empty() {
        bail!("at least one --source <id>=<dir> is required");
    }
    let sources = specs
        .iter()
        .map(|spec| FolderSource::parse(spec).map(|s| Arc::new(s) as Arc<dyn DataSource>))
        .collect::<crate::Result<Vec<_>>>()?;

    let summary = system.sync_manager(sources).sync_all().await;

    for report in &summary.reports {
        match &report.error {
            None => println!(
                "✅ {:<20} {} fetched, {} ingested, {} skipped ({} ms)",
                report.source_id, report.fetched, report.ingested, report.skipped, report.duration_ms
            ),
            Some(err) => println!("❌ {:<20} {}", report.source_id, err),
        }
    }
    println!(
        "\n{} sources, {} failed, {} records, {} chunks in {} ms",
        summary.sources, summary.failed, summary.records_ingested, summary.chunks, summary.duration_ms
    );
    Ok(())
}
