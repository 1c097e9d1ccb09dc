//! `vigil review` - list, approve, and reject staged submissions

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::config::Config;
use crate::models::SubmissionStatus;
use crate::storage::{Database, SubmissionStore, TaxonomyRepository};
use crate::submission::SubmissionManager;
use crate::taxonomy::TaxonomyStore;

/// List submissions awaiting review
pub fn list(config: &Config) -> Result<()> {
    let db = Database::open(&config.database.path)?;
    let pending = db.list_by_status(SubmissionStatus::PendingReview)?;

    if pending.is_empty() {
        println!("No submissions awaiting review");
        return Ok(());
    }

    for submission in pending {
        let vulns = db.staged_vulnerabilities(submission.id)?;
        let ofcs = db.staged_ofcs(submission.id)?;
        println!(
            "{}  {}  {} vulnerabilities, {} OFCs  (model {})",
            submission.id,
            submission.source_document,
            vulns.len(),
            ofcs.len(),
            submission.model_version,
        );
    }

    Ok(())
}

/// Approve a submission, promoting staged records into production
pub fn approve(config: &Config, id: &str, reviewer: &str) -> Result<()> {
    let submission_id = Uuid::parse_str(id).context("Invalid submission id")?;
    let db = Database::open(&config.database.path)?;
    let taxonomy = load_taxonomy(&db)?;

    let manager = SubmissionManager::new(&db);
    let report = manager.approve(submission_id, reviewer, &taxonomy)?;

    println!(
        "Promoted {} vulnerabilities ({} linked to existing), {} OFCs, {} links",
        report.promoted_vulnerabilities,
        report.linked_existing,
        report.promoted_ofcs,
        report.links_created,
    );
    for failure in &report.failures {
        println!("  failed: {} ({})", failure.staged_id, failure.error);
    }

    Ok(())
}

/// Reject a submission, discarding its staged records
pub fn reject(config: &Config, id: &str, reviewer: &str) -> Result<()> {
    let submission_id = Uuid::parse_str(id).context("Invalid submission id")?;
    let db = Database::open(&config.database.path)?;

    let manager = SubmissionManager::new(&db);
    let rejected = manager.reject(submission_id, reviewer)?;
    println!("Rejected submission {submission_id} ({rejected} records discarded)");

    Ok(())
}

fn load_taxonomy(db: &Database) -> Result<TaxonomyStore> {
    let loaded = TaxonomyRepository::load(db)?;
    if loaded.sectors().is_empty() {
        Ok(TaxonomyStore::seeded())
    } else {
        Ok(loaded)
    }
}
