//! Fuzzy deduplication for candidate records
//!
//! This module performs exact and fuzzy duplicate detection for one
//! document's candidate records:
//! - Exact matching via stable content-hash dedupe keys
//! - Fuzzy matching via token-set and edit-distance similarity
//! - Best-match-wins selection among candidates above threshold
//! - Merge semantics that union OFC lists without duplicating them

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::CandidateRecord;

// ============================================================================
// Configuration
// ============================================================================

/// Deduplication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Similarity threshold above which two records are duplicates
    pub similarity_threshold: f64,

    /// Similarity threshold for OFC-level dedup during merge
    pub ofc_similarity_threshold: f64,

    /// Maximum production records loaded as the comparison reference set
    pub max_reference_records: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            ofc_similarity_threshold: 0.80,
            max_reference_records: 500,
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            anyhow::bail!("similarity_threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.ofc_similarity_threshold) {
            anyhow::bail!("ofc_similarity_threshold must be in [0, 1]");
        }
        Ok(())
    }
}

// ============================================================================
// Comparison Normalization
// ============================================================================

/// Articles dropped from comparison text
const ARTICLES: &[&str] = &["a", "an", "the"];

/// Normalize text for comparison and dedupe-key derivation.
///
/// Lowercases, strips punctuation, drops English articles, and removes
/// trivial plural suffixes so that near-identical phrasings collide.
///
/// # Examples
///
/// ```
/// use vigil::dedup::comparison_text;
///
/// assert_eq!(comparison_text("The unsecured perimeters."), "unsecured perimeter");
/// assert_eq!(comparison_text("Install a fence"), "install fence");
/// ```
pub fn comparison_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|w| !ARTICLES.contains(w))
        .map(singularize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip a trivial plural suffix from a single word.
///
/// Only the bare trailing `s` form is handled; words ending in `ss` and
/// short words are left alone.
fn singularize(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

// ============================================================================
// Similarity Scoring
// ============================================================================

/// Similarity ratio between two comparison-normalized strings, in [0, 1].
///
/// Takes the better of token-set Jaccard overlap and normalized edit
/// distance, so both reordered phrasings and small typos score high.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    };

    let edit = strsim::normalized_levenshtein(a, b);

    jaccard.max(edit)
}

/// Similarity between two candidate records.
///
/// Vulnerability text carries the majority weight, the first OFC the
/// minority. When neither record has OFC text the score is the text
/// similarity alone; OFC-only records are scored on OFC text alone.
pub fn record_similarity(a: &CandidateRecord, b: &CandidateRecord) -> f64 {
    let text_a = comparison_text(&a.text);
    let text_b = comparison_text(&b.text);
    let ofc_a = comparison_text(a.first_ofc());
    let ofc_b = comparison_text(b.first_ofc());

    let text_sim = similarity(&text_a, &text_b);
    let ofc_sim = similarity(&ofc_a, &ofc_b);

    if ofc_a.is_empty() && ofc_b.is_empty() {
        text_sim
    } else if text_a.is_empty() && text_b.is_empty() {
        ofc_sim
    } else {
        0.7 * text_sim + 0.3 * ofc_sim
    }
}

// ============================================================================
// Dedup Outcome
// ============================================================================

/// Result of deduplicating one document's candidate records
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Surviving records, each carrying a computed dedupe key
    pub records: Vec<CandidateRecord>,

    /// Candidates merged into another record from the same batch
    pub merged_in_batch: usize,

    /// Candidates matched against the persistent reference set
    pub matched_reference: usize,
}

// ============================================================================
// Deduplication Engine
// ============================================================================

/// Deduplication engine for candidate records
pub struct DedupEngine {
    config: DedupConfig,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Deduplicate a batch of candidate records against itself and a bounded
    /// reference set of existing production records.
    ///
    /// Near-duplicates within the batch are merged (best-scoring match wins,
    /// not first-found). A candidate matching a reference record adopts the
    /// reference dedupe key so promotion folds it onto the existing
    /// production row instead of inserting a sibling.
    ///
    /// The operation is idempotent: deduplicating an already-deduplicated
    /// set returns it unchanged.
    pub fn dedup(
        &self,
        records: Vec<CandidateRecord>,
        reference: &[CandidateRecord],
    ) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();
        let mut survivors: Vec<CandidateRecord> = Vec::with_capacity(records.len());

        for mut record in records {
            if record.dedupe_key.is_empty() {
                record.compute_dedupe_key();
            }

            // Exact key collision within the batch short-circuits fuzzy scoring
            if let Some(idx) = survivors
                .iter()
                .position(|s| s.dedupe_key == record.dedupe_key)
            {
                self.merge(&mut survivors[idx], record);
                outcome.merged_in_batch += 1;
                continue;
            }

            // Best match wins among everything above threshold: score all
            // survivors and all reference records before deciding.
            let mut best_batch: Option<(usize, f64)> = None;
            for (idx, survivor) in survivors.iter().enumerate() {
                let score = record_similarity(survivor, &record);
                if score >= self.config.similarity_threshold
                    && score > best_batch.map(|(_, s)| s).unwrap_or(0.0)
                {
                    best_batch = Some((idx, score));
                }
            }

            let mut best_reference: Option<(&CandidateRecord, f64)> = None;
            for existing in reference {
                let score = if existing.dedupe_key == record.dedupe_key {
                    1.0
                } else {
                    record_similarity(existing, &record)
                };
                if score >= self.config.similarity_threshold
                    && score > best_reference.map(|(_, s)| s).unwrap_or(0.0)
                {
                    best_reference = Some((existing, score));
                }
            }

            match (best_batch, best_reference) {
                // The stronger of the two wins; ties go to the batch so the
                // document's own records consolidate first.
                (Some((idx, batch_score)), Some((_, ref_score))) if batch_score >= ref_score => {
                    debug!(score = batch_score, "merging near-duplicate into batch survivor");
                    self.merge(&mut survivors[idx], record);
                    outcome.merged_in_batch += 1;
                }
                (_, Some((existing, score))) => {
                    debug!(score, key = %existing.dedupe_key, "candidate matches existing production record");
                    record.dedupe_key = existing.dedupe_key.clone();
                    outcome.matched_reference += 1;
                    survivors.push(record);
                }
                (Some((idx, score)), None) => {
                    debug!(score, "merging near-duplicate into batch survivor");
                    self.merge(&mut survivors[idx], record);
                    outcome.merged_in_batch += 1;
                }
                (None, None) => survivors.push(record),
            }
        }

        outcome.records = survivors;
        outcome
    }

    /// Merge `other` into `into`.
    ///
    /// OFC lists are unioned with OFC-level fuzzy dedup, source references
    /// are unioned, and the vulnerability text of the higher-confidence
    /// variant survives. The dedupe key is recomputed afterwards since the
    /// surviving text may have changed.
    fn merge(&self, into: &mut CandidateRecord, other: CandidateRecord) {
        let mut text_changed = false;
        if other.confidence_score() > into.confidence_score() {
            text_changed = other.text != into.text;
            into.text = other.text;
            into.confidence = other.confidence;
            into.impact = other.impact.or(into.impact);
            into.discipline = other.discipline.or(into.discipline.take());
            into.sector = other.sector.or(into.sector.take());
            into.subsector = other.subsector.or(into.subsector.take());
        }

        for ofc in other.ofc_texts {
            self.push_ofc(&mut into.ofc_texts, ofc);
        }

        for source in other.source_refs {
            if !into.source_refs.contains(&source) {
                into.source_refs.push(source);
            }
        }

        // An adopted reference key survives the merge; the fingerprint only
        // follows content when the surviving text actually changed.
        if text_changed {
            into.compute_dedupe_key();
        }
    }

    /// Append an OFC unless a near-duplicate is already present
    fn push_ofc(&self, ofcs: &mut Vec<String>, candidate: String) {
        let normalized = comparison_text(&candidate);
        let duplicate = ofcs.iter().any(|existing| {
            similarity(&comparison_text(existing), &normalized)
                >= self.config.ofc_similarity_threshold
        });
        if !duplicate {
            ofcs.push(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confidence;

    fn record(text: &str, ofcs: &[&str]) -> CandidateRecord {
        let mut r = CandidateRecord {
            text: text.to_string(),
            ofc_texts: ofcs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        r.compute_dedupe_key();
        r
    }

    #[test]
    fn test_comparison_text_strips_articles_and_plurals() {
        assert_eq!(comparison_text("The unsecured perimeters."), "unsecured perimeter");
        assert_eq!(comparison_text("Install a fence"), "install fence");
        assert_eq!(comparison_text("Access  Control!!"), "access control");
    }

    #[test]
    fn test_singularize_leaves_double_s() {
        assert_eq!(singularize("access"), "access");
        assert_eq!(singularize("doors"), "door");
        assert_eq!(singularize("gas"), "gas");
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("", "abc"), 0.0);
        let s = similarity("unsecured perimeter fence", "perimeter fence unsecured");
        assert!(s > 0.9, "token-set should ignore order: {s}");
    }

    #[test]
    fn test_exact_duplicate_merges_with_union() {
        let engine = DedupEngine::new(DedupConfig::default());
        let a = record("Unsecured Perimeter", &["Install fencing"]);
        let b = record("Unsecured Perimeter", &["Install fencing", "Add lighting"]);
        assert_eq!(a.dedupe_key, b.dedupe_key);

        let outcome = engine.dedup(vec![a, b], &[]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.merged_in_batch, 1);
        // OFC union without duplicating the shared entry
        assert_eq!(outcome.records[0].ofc_texts.len(), 2);
    }

    #[test]
    fn test_near_duplicate_fuzzy_merge() {
        let engine = DedupEngine::new(DedupConfig::default());
        let a = record("Lack of visitor management policy", &["Adopt visitor badges"]);
        let b = record("Lack of a visitor management policies", &["Adopt visitor badges"]);

        let outcome = engine.dedup(vec![a, b], &[]);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn test_distinct_records_survive() {
        let engine = DedupEngine::new(DedupConfig::default());
        let a = record("Unsecured perimeter fencing", &["Install fencing"]);
        let b = record("No emergency lighting in stairwells", &["Install battery lighting"]);

        let outcome = engine.dedup(vec![a, b], &[]);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.merged_in_batch, 0);
    }

    #[test]
    fn test_idempotence() {
        let engine = DedupEngine::new(DedupConfig::default());
        let records = vec![
            record("Unsecured perimeter fencing", &["Install fencing"]),
            record("No emergency lighting in stairwells", &["Install battery lighting"]),
            record("Propped-open exterior doors", &["Install door alarms"]),
        ];

        let first = engine.dedup(records, &[]);
        let first_keys: Vec<String> = first.records.iter().map(|r| r.dedupe_key.clone()).collect();

        let second = engine.dedup(first.records.clone(), &[]);
        let second_keys: Vec<String> =
            second.records.iter().map(|r| r.dedupe_key.clone()).collect();

        assert_eq!(first.records.len(), second.records.len());
        assert_eq!(first_keys, second_keys);
        assert_eq!(second.merged_in_batch, 0);
    }

    #[test]
    fn test_best_match_wins_over_first_found() {
        let engine = DedupEngine::new(DedupConfig::default());
        // Two survivors; the incoming record is closer to the second one.
        let weak = record("Unsecured perimeter gate access", &["Install fencing"]);
        let strong = record("Unsecured perimeter fence line", &["Install fencing"]);
        let incoming = record("Unsecured perimeter fence lines", &["Install fencing"]);

        let weak_score = record_similarity(&weak, &incoming);
        let strong_score = record_similarity(&strong, &incoming);
        assert!(strong_score > weak_score);

        let outcome = engine.dedup(vec![weak.clone(), strong.clone(), incoming], &[]);
        assert_eq!(outcome.records.len(), 2);
        // The survivor that absorbed the merge is the strong match; the weak
        // one is untouched.
        let weak_survivor = outcome
            .records
            .iter()
            .find(|r| r.dedupe_key == weak.dedupe_key)
            .expect("weak survivor present");
        assert_eq!(weak_survivor.ofc_texts.len(), 1);
    }

    #[test]
    fn test_reference_match_adopts_existing_key() {
        let engine = DedupEngine::new(DedupConfig::default());
        let mut existing = record("Unsecured perimeter fencing", &["Install fencing"]);
        existing.dedupe_key = "feedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedface"
            .to_string();

        let incoming = record("Unsecured perimeter fencing", &["Install fencing"]);
        let outcome = engine.dedup(vec![incoming], &[existing.clone()]);

        assert_eq!(outcome.matched_reference, 1);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].dedupe_key, existing.dedupe_key);
    }

    #[test]
    fn test_merge_keeps_higher_confidence_text() {
        let engine = DedupEngine::new(DedupConfig::default());
        let mut low = record("Unsecured perimeter fencing", &["Install fencing"]);
        low.confidence = Some(Confidence::Low);
        let mut high = record("Unsecured perimeter fencing around the site", &[]);
        high.confidence = Some(Confidence::High);
        // Force identical keys so the merge is exact-path
        high.dedupe_key = low.dedupe_key.clone();

        let mut survivor = low.clone();
        engine.merge(&mut survivor, high.clone());
        assert_eq!(survivor.text, high.text);
        assert_eq!(survivor.confidence, Some(Confidence::High));
        // OFCs from the lower-confidence variant are retained
        assert_eq!(survivor.ofc_texts.len(), 1);
    }
}
