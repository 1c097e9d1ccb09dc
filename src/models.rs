// Core data structures for the vigil pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Untyped record shape as produced by the extraction parser.
///
/// Raw records never flow past the validator; the validator is the single
/// conversion point into [`CandidateRecord`].
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Model-reported confidence for an extracted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Numeric score used when comparing variants during merge
    pub fn score(&self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 0.6,
            Self::Low => 0.3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" | "moderate" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Assessed impact of a vulnerability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Impact {
    High,
    Moderate,
    Low,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Moderate => "moderate",
            Self::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "moderate" | "medium" => Some(Self::Moderate),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Source document format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
    #[default]
    Txt,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Txt => "txt",
        }
    }

    /// Detect format from a filename extension, defaulting to plain text
    pub fn from_filename(filename: &str) -> Self {
        match filename.rsplit('.').next().map(|e| e.to_lowercase()) {
            Some(ext) if ext == "pdf" => Self::Pdf,
            Some(ext) if ext == "docx" || ext == "doc" => Self::Docx,
            Some(ext) if ext == "xlsx" || ext == "xls" => Self::Xlsx,
            _ => Self::Txt,
        }
    }
}

/// Reference back to the source document for one extracted record
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SourceRef {
    pub title: String,
    pub url: Option<String>,
    pub page: Option<u32>,
    pub document_filename: String,
}

/// One validated extracted unit before persistence.
///
/// Created by the validator from a [`RawRecord`], consumed by the dedup
/// engine and taxonomy resolver, discarded once folded into a submission.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandidateRecord {
    /// Vulnerability statement; may be empty for an OFC-only record
    pub text: String,

    /// Zero or more mitigation statements, in extraction order
    pub ofc_texts: Vec<String>,

    pub discipline: Option<String>,
    pub sector: Option<String>,
    pub subsector: Option<String>,

    pub confidence: Option<Confidence>,
    pub impact: Option<Impact>,

    pub source_refs: Vec<SourceRef>,

    /// Stable content fingerprint; empty until computed
    pub dedupe_key: String,
}

impl CandidateRecord {
    /// First OFC text, or empty string when the record has none
    pub fn first_ofc(&self) -> &str {
        self.ofc_texts.first().map(String::as_str).unwrap_or("")
    }

    /// Compute and store the dedupe key from the current text content.
    ///
    /// The key is the lowercase hex SHA-256 of the comparison-normalized
    /// vulnerability text joined with the comparison-normalized first OFC.
    /// Records with identical semantic content after normalization produce
    /// the same key.
    pub fn compute_dedupe_key(&mut self) {
        self.dedupe_key = dedupe_key(&self.text, self.first_ofc());
    }

    /// Confidence score used to pick the surviving text during merge
    pub fn confidence_score(&self) -> f64 {
        self.confidence.map(|c| c.score()).unwrap_or(0.0)
    }
}

/// Compute the stable dedupe key for a (vulnerability, first OFC) text pair.
///
/// Lowercase hex SHA-256 digest, always 64 characters.
pub fn dedupe_key(text: &str, first_ofc: &str) -> String {
    let normalized = format!(
        "{}|{}",
        crate::dedup::comparison_text(text),
        crate::dedup::comparison_text(first_ofc)
    );
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{digest:x}")
}

/// Review status of a staged submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Pending,
    PendingReview,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "pending_review" => Ok(Self::PendingReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown submission status: {other}")),
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reviewable unit wrapping all candidate records from one document run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub status: SubmissionStatus,
    pub source_document: String,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewer: Option<String>,
}

impl Submission {
    pub fn new(source_document: &str, model_version: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SubmissionStatus::PendingReview,
            source_document: source_document.to_string(),
            model_version: model_version.to_string(),
            created_at: Utc::now(),
            reviewed_at: None,
            reviewer: None,
        }
    }
}

/// Staged vulnerability row, keyed by a staging ID that is never promoted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedVulnerability {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub text: String,
    pub discipline: Option<String>,
    pub sector: Option<String>,
    pub subsector: Option<String>,
    pub confidence: Option<Confidence>,
    pub impact: Option<Impact>,
    pub source_title: String,
    pub source_url: Option<String>,
    pub source_page: Option<u32>,
    pub dedupe_key: String,
}

/// Staged option-for-consideration row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedOfc {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub text: String,
}

/// How a vulnerability and an OFC are related
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    Direct,
    Inferred,
    Recommended,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Inferred => "inferred",
            Self::Recommended => "recommended",
        }
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "inferred" => Ok(Self::Inferred),
            "recommended" => Ok(Self::Recommended),
            other => Err(format!("unknown link type: {other}")),
        }
    }
}

/// N:M link between a staged vulnerability and a staged OFC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedLink {
    pub vulnerability_id: Uuid,
    pub ofc_id: Uuid,
    pub link_type: LinkType,
    pub confidence_score: f64,
}

/// Canonical, deduplicated knowledge-base vulnerability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionVulnerability {
    pub id: Uuid,
    pub text: String,
    pub discipline: Option<String>,
    pub sector: Option<String>,
    pub subsector: Option<String>,
    pub impact: Option<Impact>,
    /// Unique (nullable): at most one canonical vulnerability per fingerprint
    pub dedupe_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Canonical knowledge-base OFC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionOfc {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Production-side vulnerability/OFC link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityOfcLink {
    pub vulnerability_id: Uuid,
    pub ofc_id: Uuid,
    pub link_type: LinkType,
    pub confidence_score: f64,
}

/// Kind of analyst decision captured by a learning event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningEventType {
    Approval,
    Rejection,
    Correction,
    Edited,
}

impl LearningEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Rejection => "rejection",
            Self::Correction => "correction",
            Self::Edited => "edited",
        }
    }
}

impl std::str::FromStr for LearningEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval" => Ok(Self::Approval),
            "rejection" => Ok(Self::Rejection),
            "correction" => Ok(Self::Correction),
            "edited" => Ok(Self::Edited),
            other => Err(format!("unknown learning event type: {other}")),
        }
    }
}

/// Immutable, append-only analyst decision record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningEvent {
    pub id: Uuid,
    pub event_type: LearningEventType,
    pub approved: bool,
    pub confidence_score: Option<f64>,
    pub source_document: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LearningEvent {
    pub fn new(event_type: LearningEventType, approved: bool, source_document: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            approved,
            confidence_score: None,
            source_document: source_document.to_string(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One recorded threshold change from a learning cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdAdjustment {
    pub old_value: f64,
    pub new_value: f64,
    pub accept_rate: f64,
    pub reason: String,
    pub adjusted_at: DateTime<Utc>,
}

/// Maximum retained adjustment history entries (most-recent-first)
pub const ADJUSTMENT_HISTORY_CAP: usize = 50;

/// Process-wide adaptive heuristics, persisted across restarts.
///
/// Mutated only by the learning feedback controller; the prompt composer
/// and validator read immutable snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicsState {
    pub confidence_threshold: f64,
    pub high_confidence_threshold: f64,
    pub last_updated: DateTime<Utc>,
    pub adjustment_history: Vec<ThresholdAdjustment>,
}

impl Default for HeuristicsState {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.70,
            high_confidence_threshold: 0.85,
            last_updated: Utc::now(),
            adjustment_history: Vec::new(),
        }
    }
}

impl HeuristicsState {
    /// Record an adjustment at the front of the bounded history
    pub fn record_adjustment(&mut self, adjustment: ThresholdAdjustment) {
        self.confidence_threshold = adjustment.new_value;
        self.last_updated = adjustment.adjusted_at;
        self.adjustment_history.insert(0, adjustment);
        self.adjustment_history.truncate(ADJUSTMENT_HISTORY_CAP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_key_length_and_stability() {
        let a = dedupe_key("Unsecured perimeter", "Install fencing");
        let b = dedupe_key("Unsecured perimeter", "Install fencing");
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_dedupe_key_normalization_equivalence() {
        // Case, punctuation, and articles are erased by comparison
        // normalization, so these must collide.
        let a = dedupe_key("The unsecured perimeter.", "Install a fence");
        let b = dedupe_key("unsecured perimeter", "install fence");
        assert_eq!(a, b);
    }

    #[test]
    fn test_submission_status_round_trip() {
        for status in [
            SubmissionStatus::Pending,
            SubmissionStatus::PendingReview,
            SubmissionStatus::Approved,
            SubmissionStatus::Rejected,
        ] {
            let parsed: SubmissionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(DocumentFormat::from_filename("report.PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_filename("a.docx"), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::from_filename("noext"), DocumentFormat::Txt);
    }

    #[test]
    fn test_adjustment_history_cap() {
        let mut state = HeuristicsState::default();
        for i in 0..(ADJUSTMENT_HISTORY_CAP + 10) {
            state.record_adjustment(ThresholdAdjustment {
                old_value: 0.7,
                new_value: 0.7,
                accept_rate: 0.5,
                reason: format!("cycle {i}"),
                adjusted_at: Utc::now(),
            });
        }
        assert_eq!(state.adjustment_history.len(), ADJUSTMENT_HISTORY_CAP);
        // Most recent first
        assert!(state.adjustment_history[0].reason.contains("59"));
    }

    #[test]
    fn test_new_submission_is_pending_review() {
        let sub = Submission::new("assessment.pdf", "model-1");
        assert_eq!(sub.status, SubmissionStatus::PendingReview);
        assert!(sub.reviewed_at.is_none());
    }

    #[test]
    fn test_confidence_parse() {
        assert_eq!(Confidence::parse("High"), Some(Confidence::High));
        assert_eq!(Confidence::parse("moderate"), Some(Confidence::Medium));
        assert_eq!(Confidence::parse("n/a"), None);
    }
}
