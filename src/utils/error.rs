//! Domain error types for the vigil pipeline
//!
//! This module defines the typed failures surfaced at each pipeline stage.

use thiserror::Error;

/// Errors from text normalization
#[derive(Error, Debug)]
pub enum NormalizeError {
    /// Input document contained no content
    #[error("document is empty")]
    EmptyDocument,
}

/// Errors from the inference service adapter
#[derive(Error, Debug)]
pub enum InferenceError {
    /// Request exceeded the configured deadline
    #[error("inference request timed out")]
    Timeout,

    /// Service unreachable
    #[error("inference service refused the connection")]
    ConnectionRefused,

    /// Service responded with a non-success status
    #[error("inference service error: status {0}")]
    ServerError(u16),

    /// Transport-level error not covered above
    #[error("inference transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not match the expected completion shape
    #[error("invalid inference response: {0}")]
    InvalidResponse(String),

    /// All retry attempts exhausted
    #[error("maximum inference retry attempts exceeded")]
    MaxRetriesExceeded,
}

impl InferenceError {
    /// Whether a retry could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionRefused => true,
            Self::ServerError(status) => *status >= 500,
            Self::Http(_) => true,
            Self::InvalidResponse(_) | Self::MaxRetriesExceeded => false,
        }
    }
}

/// The model's raw output could not be recovered into structured records.
///
/// Carries the raw text so the caller can persist it verbatim for triage;
/// it is never discarded silently. Distinct from an empty-but-valid result,
/// which means the document had nothing extractable.
#[derive(Error, Debug)]
#[error("extraction output unusable: {reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub raw: String,
}

impl ParseFailure {
    pub fn new(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_recoverability() {
        assert!(InferenceError::Timeout.is_recoverable());
        assert!(InferenceError::ConnectionRefused.is_recoverable());
        assert!(InferenceError::ServerError(503).is_recoverable());
        assert!(!InferenceError::ServerError(400).is_recoverable());
        assert!(!InferenceError::InvalidResponse("bad".into()).is_recoverable());
    }

    #[test]
    fn test_parse_failure_carries_raw() {
        let failure = ParseFailure::new("unbalanced brackets", "raw model output");
        assert_eq!(failure.raw, "raw model output");
        assert!(failure.to_string().contains("unbalanced brackets"));
    }
}
