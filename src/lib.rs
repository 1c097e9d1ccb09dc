//! vigil - Security-Assessment Knowledge Pipeline
//!
//! Turns unstructured security-assessment documents into validated,
//! deduplicated, taxonomy-classified knowledge-base records, with a human
//! review gate and a feedback loop that adapts extraction behavior over
//! time.
//!
//! # Architecture
//!
//! The library is organized into pipeline-stage modules:
//!
//! - [`normalize`] - Text cleanup and bounded chunking
//! - [`prompt`] - Prompt composition with bias rules and enrichment
//! - [`inference`] - External completion-service adapter
//! - [`extract`] - Tolerant output parsing and record validation
//! - [`dedup`] - Exact and fuzzy deduplication
//! - [`taxonomy`] - Sector/subsector/discipline resolution
//! - [`submission`] - Staging, approval, and rejection lifecycle
//! - [`learning`] - Feedback-driven threshold adaptation
//! - [`pipeline`] - Document-run orchestration
//! - [`storage`] - SQLite persistence and triage artifacts
//!
//! # Example
//!
//! ```no_run
//! use vigil::config::Config;
//! use vigil::pipeline::{DocumentInput, DocumentPipeline};
//! use vigil::storage::Database;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let db = Database::open(&config.database.path)?;
//!     let pipeline = DocumentPipeline::new(&config, &db)?;
//!
//!     let input = DocumentInput::new("extracted text...", "assessment.pdf");
//!     let outcome = pipeline.run(input).await?;
//!     println!("staged {} records", outcome.stats.records_staged);
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod inference;
pub mod learning;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod prompt;
pub mod storage;
pub mod submission;
pub mod taxonomy;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, VigilErrorTrait};
    pub use crate::models::{
        CandidateRecord, Confidence, HeuristicsState, Impact, LearningEvent, Submission,
        SubmissionStatus,
    };
    pub use crate::pipeline::{DocumentInput, DocumentPipeline, PipelineOutcome};
    pub use crate::storage::Database;
}

// Direct re-exports for convenience
pub use models::{CandidateRecord, Confidence, Impact, Submission, SubmissionStatus};
