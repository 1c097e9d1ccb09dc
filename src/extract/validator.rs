//! Record validation and hallucination filtering
//!
//! The single conversion point from untyped [`RawRecord`] dictionaries into
//! typed [`CandidateRecord`]s. Rejections are reason-coded and counted,
//! never silently dropped.
//!
//! Pattern lists used for rejection are configurable data, and they are
//! required to be disjoint from text the pipeline itself synthesizes
//! (the implied-gap note attached to OFC-only records); that disjointness
//! is enforced by a unit test rather than convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::{CandidateRecord, Confidence, HeuristicsState, Impact, RawRecord, SourceRef};

/// Prefix of the note synthesized for OFC-only records.
///
/// Rejection pattern lists must never match text starting with this prefix.
pub const IMPLIED_GAP_PREFIX: &str = "Implied gap in guidance";

/// Default minimum accepted text length in characters
pub const DEFAULT_MIN_TEXT_LEN: usize = 4;

// ============================================================================
// Configuration
// ============================================================================

/// Validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum accepted text length (characters); applies to vulnerability
    /// text and to individual OFC entries
    pub min_text_len: usize,

    /// Domain tag of the corpus, e.g. "physical security"
    pub domain: String,

    /// Whole-text placeholder markers (matched against the full trimmed,
    /// lowercased text)
    pub placeholder_exact: Vec<String>,

    /// Placeholder phrases matched as substrings
    pub placeholder_substrings: Vec<String>,

    /// Terms that mark content as outside the configured domain
    pub domain_exclusions: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_text_len: DEFAULT_MIN_TEXT_LEN,
            domain: "physical security".to_string(),
            placeholder_exact: [
                "n/a", "na", "none", "unknown", "tbd", "todo", "null", "nil", "-",
            ]
            .map(String::from)
            .to_vec(),
            placeholder_substrings: [
                "lorem ipsum",
                "insert text here",
                "to be determined",
                "sample text",
                "placeholder",
                "example vulnerability",
                "your text here",
            ]
            .map(String::from)
            .to_vec(),
            domain_exclusions: [
                "cve-",
                "sql injection",
                "cross-site scripting",
                "xss",
                "malware",
                "ransomware",
                "phishing",
                "zero-day",
                "buffer overflow",
                "botnet",
                "denial of service",
                "endpoint detection",
                "firewall rule",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

// ============================================================================
// Rejection Reporting
// ============================================================================

/// Reason a record was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    Empty,
    PlaceholderText,
    TooShort,
    OutOfDomain,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::PlaceholderText => "placeholder_text",
            Self::TooShort => "too_short",
            Self::OutOfDomain => "out_of_domain",
        }
    }
}

/// One rejected record with its reason code
#[derive(Debug, Clone)]
pub struct Rejection {
    pub reason: RejectionReason,
    /// Truncated text sample for logging
    pub sample: String,
}

/// Result of validating one document's assembled record set
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub records: Vec<CandidateRecord>,
    pub rejections: Vec<Rejection>,
}

impl ValidationOutcome {
    pub fn rejected_count(&self, reason: RejectionReason) -> usize {
        self.rejections.iter().filter(|r| r.reason == reason).count()
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Record validator and hallucination filter
pub struct RecordValidator {
    config: ValidationConfig,
}

impl RecordValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate a document's assembled raw records.
    ///
    /// Runs once after all chunks are parsed, so merge logic downstream can
    /// still combine fragments that individually look thin. Every rejection
    /// carries a reason code and is counted in the outcome.
    pub fn validate_batch(
        &self,
        raw_records: Vec<RawRecord>,
        source: &SourceRef,
        heuristics: &HeuristicsState,
    ) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        for raw in raw_records {
            match self.validate_one(raw, source, heuristics) {
                Ok(record) => outcome.records.push(record),
                Err(rejection) => {
                    debug!(reason = rejection.reason.as_str(), sample = %rejection.sample, "record rejected");
                    outcome.rejections.push(rejection);
                }
            }
        }

        outcome
    }

    fn validate_one(
        &self,
        raw: RawRecord,
        source: &SourceRef,
        heuristics: &HeuristicsState,
    ) -> Result<CandidateRecord, Rejection> {
        let text = first_string(&raw, &["vulnerability", "vulnerability_text", "text", "finding"])
            .unwrap_or_default();
        let mut ofc_texts = collect_ofcs(&raw);

        // OFC entries below the minimum length are dropped individually
        ofc_texts.retain(|ofc| ofc.trim().chars().count() >= self.config.min_text_len);

        let text = text.trim().to_string();

        if text.is_empty() && ofc_texts.is_empty() {
            return Err(reject(RejectionReason::Empty, "<empty>"));
        }

        // OFC-only record: synthesize the implied-gap note rather than
        // rejecting legitimate mitigation-only content
        let (text, synthesized) = if text.is_empty() {
            (implied_gap_note(&ofc_texts[0]), true)
        } else {
            (text, false)
        };

        if !synthesized {
            if self.is_placeholder(&text) {
                return Err(reject(RejectionReason::PlaceholderText, &text));
            }
            if text.chars().count() < self.config.min_text_len {
                return Err(reject(RejectionReason::TooShort, &text));
            }
        }

        if let Some(term) = self.out_of_domain_term(&text, &ofc_texts) {
            debug!(term, domain = %self.config.domain, "out-of-domain content");
            return Err(reject(RejectionReason::OutOfDomain, &text));
        }

        let confidence = parse_confidence(raw.get("confidence"), heuristics);
        let impact = raw
            .get("impact")
            .and_then(Value::as_str)
            .and_then(Impact::parse);
        let discipline = first_string(&raw, &["discipline"]);
        let sector = first_string(&raw, &["sector"]);
        let subsector = first_string(&raw, &["subsector"]);
        let page = raw.get("page").and_then(Value::as_u64).map(|p| p as u32);

        let mut source_ref = source.clone();
        if source_ref.page.is_none() {
            source_ref.page = page;
        }

        let mut record = CandidateRecord {
            text,
            ofc_texts,
            discipline,
            sector,
            subsector,
            confidence,
            impact,
            source_refs: vec![source_ref],
            dedupe_key: String::new(),
        };
        record.compute_dedupe_key();
        Ok(record)
    }

    /// Whether text matches a placeholder marker.
    ///
    /// Exact markers compare against the whole trimmed, lowercased text;
    /// substring markers match anywhere. The synthesized implied-gap note is
    /// never a placeholder.
    pub fn is_placeholder(&self, text: &str) -> bool {
        if text.starts_with(IMPLIED_GAP_PREFIX) {
            return false;
        }
        let lowered = text.trim().to_lowercase();
        self.config.placeholder_exact.iter().any(|p| lowered == *p)
            || self
                .config
                .placeholder_substrings
                .iter()
                .any(|p| lowered.contains(p.as_str()))
    }

    /// First domain-exclusion term found in the record's text or OFCs
    fn out_of_domain_term(&self, text: &str, ofcs: &[String]) -> Option<&str> {
        let lowered_text = text.to_lowercase();
        let lowered_ofcs: Vec<String> = ofcs.iter().map(|o| o.to_lowercase()).collect();

        self.config.domain_exclusions.iter().map(String::as_str).find(|term| {
            lowered_text.contains(term) || lowered_ofcs.iter().any(|o| o.contains(term))
        })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }
}

/// Build the synthesized note attached to an OFC-only record
pub fn implied_gap_note(first_ofc: &str) -> String {
    format!("{IMPLIED_GAP_PREFIX}: no stated vulnerability for \"{first_ofc}\"")
}

fn reject(reason: RejectionReason, text: &str) -> Rejection {
    let sample: String = text.chars().take(120).collect();
    Rejection { reason, sample }
}

/// First non-empty string value among the given keys
fn first_string(raw: &RawRecord, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        raw.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}

/// Collect OFC texts from any of the accepted field shapes
fn collect_ofcs(raw: &RawRecord) -> Vec<String> {
    for key in ["ofcs", "options_for_consideration", "mitigations"] {
        if let Some(Value::Array(items)) = raw.get(key) {
            return items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }
    for key in ["ofc", "option_for_consideration", "mitigation"] {
        if let Some(text) = raw.get(key).and_then(Value::as_str) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return vec![trimmed.to_string()];
            }
        }
    }
    Vec::new()
}

/// Map the model's confidence field (string label or numeric score) to the
/// enum, using the current adaptive thresholds for numeric values
fn parse_confidence(value: Option<&Value>, heuristics: &HeuristicsState) -> Option<Confidence> {
    match value {
        Some(Value::String(s)) => Confidence::parse(s),
        Some(Value::Number(n)) => {
            let score = n.as_f64()?;
            Some(if score >= heuristics.high_confidence_threshold {
                Confidence::High
            } else if score >= heuristics.confidence_threshold {
                Confidence::Medium
            } else {
                Confidence::Low
            })
        }
        _ => None,
    }
}
