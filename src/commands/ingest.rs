//! `vigil ingest` - run one document through the pipeline

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::pipeline::{DocumentInput, DocumentPipeline};
use crate::storage::Database;

/// Ingest a text-extracted document and stage a submission for review
pub async fn run(config: &Config, path: &Path, title: Option<String>) -> Result<()> {
    let raw_text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read document: {}", path.display()))?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut input = DocumentInput::new(raw_text, filename);
    if let Some(title) = title {
        input = input.with_title(title);
    }

    let db = Database::open(&config.database.path)?;
    let pipeline = DocumentPipeline::new(config, &db)?;
    let outcome = pipeline.run(input).await?;

    match &outcome.submission {
        Some(submission) => {
            info!(submission_id = %submission.id, "submission staged for review");
            println!("Staged submission {} ({} records)", submission.id, outcome.stats.records_staged);
        }
        None => {
            println!("No stageable records extracted");
        }
    }

    let stats = &outcome.stats;
    println!(
        "chunks: {} ({} failed), parsed: {}, rejected: {}, merged: {}, staged: {}",
        stats.chunks_total,
        stats.chunks_failed,
        stats.records_parsed,
        stats.rejected_total(),
        stats.merged_in_batch,
        stats.records_staged,
    );

    for path in &outcome.artifact_paths {
        println!("parse-failure artifact: {}", path.display());
    }

    Ok(())
}
