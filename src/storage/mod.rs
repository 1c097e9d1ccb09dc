//! Persistent storage for the vigil pipeline
//!
//! SQLite-backed two-tier persistence: staging tables hold unreviewed
//! per-submission data, production tables hold approved canonical
//! knowledge. Learning events and the heuristics singleton live alongside
//! them. Parse-failure artifacts are plain files, handled by [`artifacts`].

pub mod artifacts;
pub mod repository;

pub use artifacts::{ArtifactStore, FsArtifactStore};
pub use repository::{
    Database, HeuristicsStore, LearningStore, ProductionStore, SubmissionStore, TaxonomyRepository,
};
