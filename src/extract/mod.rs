//! Structured record extraction from raw model output
//!
//! Two stages with a hard boundary between them:
//!
//! - [`parser`] recovers a list of untyped record dictionaries from the
//!   model's raw completion text, tolerating markdown fences, surrounding
//!   prose, and trailing separators.
//! - [`validator`] is the single conversion point from untyped dictionaries
//!   into typed [`crate::models::CandidateRecord`]s, rejecting empty,
//!   placeholder, too-short, and out-of-domain content with reason codes.

pub mod parser;
pub mod validator;

pub use parser::ExtractionParser;
pub use validator::{RecordValidator, Rejection, RejectionReason, ValidationConfig, ValidationOutcome};
