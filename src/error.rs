//! Unified error handling for the vigil crate
//!
//! This module provides a unified error type that consolidates all
//! domain-specific errors into a single `Error` enum, while maintaining the
//! ability to use domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`VigilErrorTrait`] - Common interface implemented by the unified type
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::utils::error::{InferenceError, NormalizeError, ParseFailure};

/// Common interface for error handling across modules
pub trait VigilErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Inference-service errors (timeout, connection, server status)
    Inference,
    /// Parsing and extraction-recovery errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the vigil crate
#[derive(Error, Debug)]
pub enum Error {
    /// Text normalization errors
    #[error("Normalize error: {0}")]
    Normalize(#[from] NormalizeError),

    /// Inference adapter errors
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Extraction parse failures (raw output preserved for triage)
    #[error("Parse failure: {0}")]
    Parse(#[from] ParseFailure),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl VigilErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Normalize(_) => false,
            Self::Inference(e) => e.is_recoverable(),
            Self::Parse(_) => false,
            Self::Database(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Inference(_) => ErrorCategory::Inference,
            Self::Normalize(_) | Self::Parse(_) | Self::Json(_) => ErrorCategory::Parsing,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let inference_err = Error::Inference(InferenceError::Timeout);
        assert_eq!(inference_err.category(), ErrorCategory::Inference);

        let normalize_err = Error::Normalize(NormalizeError::EmptyDocument);
        assert_eq!(normalize_err.category(), ErrorCategory::Parsing);
    }

    #[test]
    fn test_is_recoverable() {
        let timeout = Error::Inference(InferenceError::Timeout);
        assert!(timeout.is_recoverable());

        let parse = Error::Parse(ParseFailure::new("unbalanced", "raw"));
        assert!(!parse.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("invalid similarity threshold");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_parse_failure_conversion() {
        let failure = ParseFailure::new("no structure found", "prose only");
        let unified: Error = failure.into();
        assert!(matches!(unified, Error::Parse(_)));
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
    }
}
