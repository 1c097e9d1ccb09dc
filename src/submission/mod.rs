//! Submission lifecycle: staging, approval, rejection
//!
//! A submission wraps all candidate records from one document run as a
//! reviewable unit. Approval promotes staged entities into production,
//! remapping staging IDs to fresh production IDs and recreating links;
//! rejection emits learning events and then cascade-deletes the staged
//! data. Approval never deletes staged rows, so the audit trail survives.
//!
//! Promotion is per-item: one staged entity failing to promote is logged
//! and skipped, and its siblings still promote. Partial success is
//! explicit in the returned report, never hidden.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    CandidateRecord, LearningEvent, LearningEventType, LinkType, ProductionOfc,
    ProductionVulnerability, StagedLink, StagedOfc, StagedVulnerability, Submission,
    SubmissionStatus, VulnerabilityOfcLink,
};
use crate::storage::{LearningStore, ProductionStore, SubmissionStore};
use crate::taxonomy::TaxonomyStore;

// ============================================================================
// Promotion Report
// ============================================================================

/// One staged item that failed to promote
#[derive(Debug)]
pub struct PromotionFailure {
    pub staged_id: Uuid,
    pub error: String,
}

/// Outcome of approving a submission
#[derive(Debug, Default)]
pub struct PromotionReport {
    /// Vulnerabilities inserted as new production rows
    pub promoted_vulnerabilities: usize,

    /// Vulnerabilities resolved onto an existing production row by dedupe key
    pub linked_existing: usize,

    /// OFCs inserted as new production rows
    pub promoted_ofcs: usize,

    /// Links recreated through the staging-to-production ID map
    pub links_created: usize,

    /// Per-item failures; siblings were still promoted
    pub failures: Vec<PromotionFailure>,
}

impl PromotionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Submission lifecycle manager over the staging, production, and learning
/// stores. [`crate::storage::Database`] implements all three.
pub struct SubmissionManager<'a, S>
where
    S: SubmissionStore + ProductionStore + LearningStore,
{
    store: &'a S,
}

impl<'a, S> SubmissionManager<'a, S>
where
    S: SubmissionStore + ProductionStore + LearningStore,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Stage deduplicated, taxonomy-tagged records as one reviewable unit.
    ///
    /// The submission is created at `pending_review`; there is no path to a
    /// terminal status that skips review.
    pub fn stage(
        &self,
        records: &[CandidateRecord],
        source_document: &str,
        model_version: &str,
    ) -> Result<Submission> {
        let submission = Submission::new(source_document, model_version);

        let mut vulnerabilities = Vec::with_capacity(records.len());
        let mut ofcs: Vec<StagedOfc> = Vec::new();
        let mut links = Vec::new();
        // Identical OFC text shares one staged row within the submission
        let mut ofc_ids: HashMap<String, Uuid> = HashMap::new();

        for record in records {
            let source = record.source_refs.first().cloned().unwrap_or_default();
            let vuln = StagedVulnerability {
                id: Uuid::new_v4(),
                submission_id: submission.id,
                text: record.text.clone(),
                discipline: record.discipline.clone(),
                sector: record.sector.clone(),
                subsector: record.subsector.clone(),
                confidence: record.confidence,
                impact: record.impact,
                source_title: source.title,
                source_url: source.url,
                source_page: source.page,
                dedupe_key: record.dedupe_key.clone(),
            };

            for ofc_text in &record.ofc_texts {
                let ofc_id = *ofc_ids.entry(ofc_text.clone()).or_insert_with(|| {
                    let id = Uuid::new_v4();
                    ofcs.push(StagedOfc {
                        id,
                        submission_id: submission.id,
                        text: ofc_text.clone(),
                    });
                    id
                });

                links.push(StagedLink {
                    vulnerability_id: vuln.id,
                    ofc_id,
                    link_type: LinkType::Direct,
                    confidence_score: record.confidence_score(),
                });
            }

            vulnerabilities.push(vuln);
        }

        self.store
            .insert_staged(&submission, &vulnerabilities, &ofcs, &links)
            .context("Failed to stage submission")?;

        info!(
            submission_id = %submission.id,
            vulnerabilities = vulnerabilities.len(),
            ofcs = ofcs.len(),
            links = links.len(),
            document = source_document,
            "submission staged for review"
        );

        Ok(submission)
    }

    /// Approve a submission, promoting staged entities into production.
    ///
    /// Writes are ordered vulnerabilities/OFCs before links. A production
    /// vulnerability with the same dedupe key is linked to instead of
    /// duplicated. One item failing to promote does not abort its siblings.
    pub fn approve(
        &self,
        submission_id: Uuid,
        reviewer: &str,
        taxonomy: &TaxonomyStore,
    ) -> Result<PromotionReport> {
        let submission = self.require_reviewable(submission_id)?;
        let staged_vulns = self.store.staged_vulnerabilities(submission_id)?;
        let staged_ofcs = self.store.staged_ofcs(submission_id)?;
        let staged_links = self.store.staged_links(submission_id)?;

        let mut report = PromotionReport::default();
        // Staging ID -> production ID; entries exist only for promoted items
        let mut vuln_map: HashMap<Uuid, Uuid> = HashMap::new();
        let mut ofc_map: HashMap<Uuid, Uuid> = HashMap::new();

        // First linked OFC text per staged vulnerability, for event metadata
        let ofc_text_by_id: HashMap<Uuid, &str> =
            staged_ofcs.iter().map(|o| (o.id, o.text.as_str())).collect();
        let mut first_ofc_by_vuln: HashMap<Uuid, &str> = HashMap::new();
        for link in &staged_links {
            if let Some(text) = ofc_text_by_id.get(&link.ofc_id).copied() {
                first_ofc_by_vuln.entry(link.vulnerability_id).or_insert(text);
            }
        }

        for staged in &staged_vulns {
            match self.promote_vulnerability(staged, taxonomy) {
                Ok((production_id, existed)) => {
                    vuln_map.insert(staged.id, production_id);
                    if existed {
                        report.linked_existing += 1;
                    } else {
                        report.promoted_vulnerabilities += 1;
                    }

                    let event =
                        LearningEvent::new(LearningEventType::Approval, true, &submission.source_document)
                            .with_metadata(serde_json::json!({
                                "vulnerability": staged.text,
                                "ofc": first_ofc_by_vuln.get(&staged.id),
                                "sector": staged.sector,
                                "discipline": staged.discipline,
                            }));
                    if let Err(e) = self.store.append_event(&event) {
                        warn!(error = %e, "failed to record approval event");
                    }
                }
                Err(e) => {
                    warn!(
                        submission_id = %submission_id,
                        staged_id = %staged.id,
                        error = %e,
                        "staged vulnerability failed to promote; continuing with siblings"
                    );
                    report.failures.push(PromotionFailure {
                        staged_id: staged.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        for staged in &staged_ofcs {
            let production = ProductionOfc {
                id: Uuid::new_v4(),
                text: staged.text.clone(),
                created_at: Utc::now(),
            };
            match self.store.insert_ofc(&production) {
                Ok(()) => {
                    ofc_map.insert(staged.id, production.id);
                    report.promoted_ofcs += 1;
                }
                Err(e) => {
                    warn!(
                        submission_id = %submission_id,
                        staged_id = %staged.id,
                        error = %e,
                        "staged OFC failed to promote; continuing with siblings"
                    );
                    report.failures.push(PromotionFailure {
                        staged_id: staged.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        // Links last, remapped through the staging-to-production ID maps.
        // A link whose endpoint failed to promote is skipped with a log;
        // link-creation failure itself is non-fatal.
        for link in &staged_links {
            let (Some(vuln_id), Some(ofc_id)) = (
                vuln_map.get(&link.vulnerability_id),
                ofc_map.get(&link.ofc_id),
            ) else {
                warn!(
                    vulnerability_id = %link.vulnerability_id,
                    ofc_id = %link.ofc_id,
                    "skipping link whose endpoint did not promote"
                );
                continue;
            };

            let production_link = VulnerabilityOfcLink {
                vulnerability_id: *vuln_id,
                ofc_id: *ofc_id,
                link_type: link.link_type,
                confidence_score: link.confidence_score,
            };
            match self.store.insert_link(&production_link) {
                Ok(()) => report.links_created += 1,
                Err(e) => warn!(error = %e, "failed to create production link"),
            }
        }

        // Status flips; staged rows stay in place for audit
        self.store
            .set_status(submission_id, SubmissionStatus::Approved, Some(reviewer))?;

        info!(
            submission_id = %submission_id,
            promoted = report.promoted_vulnerabilities,
            linked_existing = report.linked_existing,
            failures = report.failures.len(),
            "submission approved"
        );

        Ok(report)
    }

    /// Reject a submission: learning events are recorded first, then the
    /// submission and all staged children are deleted.
    pub fn reject(&self, submission_id: Uuid, reviewer: &str) -> Result<usize> {
        let submission = self.require_reviewable(submission_id)?;
        let staged_vulns = self.store.staged_vulnerabilities(submission_id)?;

        // Events must exist before the data they reference is gone
        for staged in &staged_vulns {
            let event =
                LearningEvent::new(LearningEventType::Rejection, false, &submission.source_document)
                    .with_metadata(serde_json::json!({
                        "vulnerability": staged.text,
                        "sector": staged.sector,
                    }));
            self.store
                .append_event(&event)
                .context("Failed to record rejection event")?;
        }

        self.store.delete_cascade(submission_id)?;

        info!(
            submission_id = %submission_id,
            rejected_items = staged_vulns.len(),
            reviewer,
            "submission rejected and discarded"
        );

        Ok(staged_vulns.len())
    }

    /// Load a submission and require it to be awaiting review
    fn require_reviewable(&self, submission_id: Uuid) -> Result<Submission> {
        let submission = self
            .store
            .get_submission(submission_id)?
            .with_context(|| format!("submission not found: {submission_id}"))?;

        if submission.status != SubmissionStatus::PendingReview {
            anyhow::bail!(
                "submission {submission_id} is {}, not pending_review",
                submission.status
            );
        }

        Ok(submission)
    }

    /// Promote one staged vulnerability; returns the production ID and
    /// whether an existing row was reused
    fn promote_vulnerability(
        &self,
        staged: &StagedVulnerability,
        taxonomy: &TaxonomyStore,
    ) -> Result<(Uuid, bool)> {
        if staged.text.trim().is_empty() {
            anyhow::bail!("staged vulnerability has empty text");
        }
        if let Some(discipline) = &staged.discipline {
            if !taxonomy.has_discipline(discipline) {
                anyhow::bail!("unknown discipline: {discipline}");
            }
        }

        // dedupe_key uniqueness: reuse the existing canonical row when the
        // fingerprint is already in production
        if !staged.dedupe_key.is_empty() {
            if let Some(existing) = self.store.find_vulnerability_by_key(&staged.dedupe_key)? {
                return Ok((existing.id, true));
            }
        }

        let production = ProductionVulnerability {
            id: Uuid::new_v4(),
            text: staged.text.clone(),
            discipline: staged.discipline.clone(),
            sector: staged.sector.clone(),
            subsector: staged.subsector.clone(),
            impact: staged.impact,
            dedupe_key: if staged.dedupe_key.is_empty() {
                None
            } else {
                Some(staged.dedupe_key.clone())
            },
            created_at: Utc::now(),
        };
        self.store.insert_vulnerability(&production)?;
        Ok((production.id, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, SourceRef};
    use crate::storage::Database;

    fn candidate(text: &str, ofcs: &[&str]) -> CandidateRecord {
        let mut record = CandidateRecord {
            text: text.to_string(),
            ofc_texts: ofcs.iter().map(|s| s.to_string()).collect(),
            discipline: Some("Physical Security".to_string()),
            sector: Some("Education Facilities".to_string()),
            subsector: Some("K-12 Schools".to_string()),
            confidence: Some(Confidence::High),
            source_refs: vec![SourceRef {
                title: "Assessment".to_string(),
                url: None,
                page: Some(2),
                document_filename: "assessment.pdf".to_string(),
            }],
            ..Default::default()
        };
        record.compute_dedupe_key();
        record
    }

    #[test]
    fn test_stage_then_approve_promotes_everything() {
        let db = Database::in_memory().unwrap();
        let manager = SubmissionManager::new(&db);
        let taxonomy = TaxonomyStore::seeded();

        let records = vec![
            candidate("Unsecured perimeter", &["Install fencing", "Add lighting"]),
            candidate("No visitor screening", &["Install a visitor kiosk"]),
        ];
        let submission = manager.stage(&records, "assessment.pdf", "model-1").unwrap();

        let report = manager.approve(submission.id, "analyst", &taxonomy).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.promoted_vulnerabilities, 2);
        assert_eq!(report.promoted_ofcs, 3);
        assert_eq!(report.links_created, 3);

        // Status flipped, staged rows retained for audit
        let loaded = db.get_submission(submission.id).unwrap().unwrap();
        assert_eq!(loaded.status, SubmissionStatus::Approved);
        assert_eq!(db.staged_vulnerabilities(submission.id).unwrap().len(), 2);

        // One approval event per promoted item
        let events = db
            .events_since(Utc::now() - chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(events.iter().filter(|e| e.approved).count(), 2);
    }

    #[test]
    fn test_approve_links_existing_by_dedupe_key() {
        let db = Database::in_memory().unwrap();
        let manager = SubmissionManager::new(&db);
        let taxonomy = TaxonomyStore::seeded();

        let first = manager
            .stage(&[candidate("Unsecured perimeter", &["Install fencing"])], "a.pdf", "m1")
            .unwrap();
        manager.approve(first.id, "analyst", &taxonomy).unwrap();
        assert_eq!(db.count_vulnerabilities().unwrap(), 1);

        // Same semantic content from another document
        let second = manager
            .stage(&[candidate("Unsecured perimeter", &["Install fencing"])], "b.pdf", "m1")
            .unwrap();
        let report = manager.approve(second.id, "analyst", &taxonomy).unwrap();

        assert_eq!(report.linked_existing, 1);
        assert_eq!(report.promoted_vulnerabilities, 0);
        assert_eq!(db.count_vulnerabilities().unwrap(), 1);
    }

    #[test]
    fn test_per_item_failure_does_not_abort_siblings() {
        let db = Database::in_memory().unwrap();
        let manager = SubmissionManager::new(&db);
        let taxonomy = TaxonomyStore::seeded();

        // Stage two good records, then corrupt one staged row with a
        // discipline the taxonomy does not know.
        let submission = Submission::new("assessment.pdf", "m1");
        let good = candidate("Unsecured perimeter", &[]);
        let vulns = vec![
            StagedVulnerability {
                id: Uuid::new_v4(),
                submission_id: submission.id,
                text: good.text.clone(),
                discipline: good.discipline.clone(),
                sector: None,
                subsector: None,
                confidence: Some(Confidence::High),
                impact: None,
                source_title: "Assessment".to_string(),
                source_url: None,
                source_page: None,
                dedupe_key: good.dedupe_key.clone(),
            },
            StagedVulnerability {
                id: Uuid::new_v4(),
                submission_id: submission.id,
                text: "No visitor screening".to_string(),
                discipline: Some("Astrology".to_string()),
                sector: None,
                subsector: None,
                confidence: None,
                impact: None,
                source_title: "Assessment".to_string(),
                source_url: None,
                source_page: None,
                dedupe_key: crate::models::dedupe_key("No visitor screening", ""),
            },
        ];
        db.insert_staged(&submission, &vulns, &[], &[]).unwrap();

        let report = manager.approve(submission.id, "analyst", &taxonomy).unwrap();
        assert_eq!(report.promoted_vulnerabilities, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("Astrology"));
        assert_eq!(db.count_vulnerabilities().unwrap(), 1);

        // The submission still reaches approved
        let loaded = db.get_submission(submission.id).unwrap().unwrap();
        assert_eq!(loaded.status, SubmissionStatus::Approved);
    }

    #[test]
    fn test_reject_records_events_then_deletes() {
        let db = Database::in_memory().unwrap();
        let manager = SubmissionManager::new(&db);

        let submission = manager
            .stage(
                &[
                    candidate("Unsecured perimeter", &["Install fencing"]),
                    candidate("No visitor screening", &[]),
                ],
                "assessment.pdf",
                "m1",
            )
            .unwrap();

        let rejected = manager.reject(submission.id, "analyst").unwrap();
        assert_eq!(rejected, 2);

        // Staged data gone, events retained
        assert!(db.get_submission(submission.id).unwrap().is_none());
        assert!(db.staged_vulnerabilities(submission.id).unwrap().is_empty());
        let events = db
            .events_since(Utc::now() - chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(events.iter().filter(|e| !e.approved).count(), 2);
    }

    #[test]
    fn test_terminal_submission_cannot_be_reviewed_again() {
        let db = Database::in_memory().unwrap();
        let manager = SubmissionManager::new(&db);
        let taxonomy = TaxonomyStore::seeded();

        let submission = manager
            .stage(&[candidate("Unsecured perimeter", &[])], "a.pdf", "m1")
            .unwrap();
        manager.approve(submission.id, "analyst", &taxonomy).unwrap();

        assert!(manager.approve(submission.id, "analyst", &taxonomy).is_err());
        assert!(manager.reject(submission.id, "analyst").is_err());
    }

    #[test]
    fn test_shared_ofc_text_staged_once() {
        let db = Database::in_memory().unwrap();
        let manager = SubmissionManager::new(&db);

        let submission = manager
            .stage(
                &[
                    candidate("Unsecured perimeter", &["Improve lighting"]),
                    candidate("Dark rear lot", &["Improve lighting"]),
                ],
                "assessment.pdf",
                "m1",
            )
            .unwrap();

        assert_eq!(db.staged_ofcs(submission.id).unwrap().len(), 1);
        assert_eq!(db.staged_links(submission.id).unwrap().len(), 2);
    }
}
