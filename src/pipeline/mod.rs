//! Document-run orchestration
//!
//! Runs one document through the full normalization pipeline: normalize →
//! compose → infer → parse → validate → dedup → classify → stage. Stages
//! execute in strict order and chunks are inferred one at a time; the
//! inference call and persistence writes are the only suspension points.
//!
//! Chunk failures are local: a timed-out chunk or an unusable completion
//! never takes down the rest of the document. A document whose every chunk
//! fails yields zero candidate records plus logged failure counts, which
//! is distinct from a document that legitimately contains nothing
//! extractable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::dedup::DedupEngine;
use crate::extract::{ExtractionParser, RecordValidator, RejectionReason};
use crate::inference::InferenceClient;
use crate::learning::{harvest_enrichment, ENRICHMENT_EVENT_WINDOW};
use crate::models::{DocumentFormat, RawRecord, SourceRef, Submission};
use crate::normalize::TextNormalizer;
use crate::prompt::{ComposerConfig, PromptComposer};
use crate::storage::{
    ArtifactStore, Database, FsArtifactStore, HeuristicsStore, LearningStore, ProductionStore,
    TaxonomyRepository,
};
use crate::submission::SubmissionManager;
use crate::taxonomy::TaxonomyResolver;

// ============================================================================
// Input / Output
// ============================================================================

/// One document handed over by the intake collaborator
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Raw extracted text (already byte-decoded upstream)
    pub raw_text: String,

    pub filename: String,

    /// Human-readable document title; defaults to the filename
    pub title: String,

    pub format: DocumentFormat,
}

impl DocumentInput {
    pub fn new(raw_text: impl Into<String>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            raw_text: raw_text.into(),
            format: DocumentFormat::from_filename(&filename),
            title: filename.clone(),
            filename,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Per-run counters; rejection counts are the observable metric for
/// records that were filtered rather than silently dropped
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub parse_failures: usize,
    pub records_parsed: usize,
    pub rejected_empty: usize,
    pub rejected_placeholder: usize,
    pub rejected_too_short: usize,
    pub rejected_out_of_domain: usize,
    pub merged_in_batch: usize,
    pub matched_reference: usize,
    pub records_staged: usize,
}

impl RunStats {
    pub fn rejected_total(&self) -> usize {
        self.rejected_empty
            + self.rejected_placeholder
            + self.rejected_too_short
            + self.rejected_out_of_domain
    }
}

/// Outcome of one document run
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Staged submission, absent when the document produced no records
    pub submission: Option<Submission>,

    pub stats: RunStats,

    /// Artifacts persisted for unusable completions
    pub artifact_paths: Vec<PathBuf>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Single-document-sequential processing pipeline
pub struct DocumentPipeline<'a> {
    normalizer: TextNormalizer,
    composer: PromptComposer,
    inference: InferenceClient,
    parser: ExtractionParser,
    validator: RecordValidator,
    dedup: DedupEngine,
    resolver: TaxonomyResolver,
    artifacts: FsArtifactStore,
    db: &'a Database,
    model_version: String,
    max_reference_records: usize,
}

impl<'a> DocumentPipeline<'a> {
    /// Build a pipeline from configuration against an opened database.
    ///
    /// The taxonomy is loaded from the store; an unseeded store falls back
    /// to the compiled-in taxonomy.
    pub fn new(config: &Config, db: &'a Database) -> Result<Self> {
        let taxonomy = {
            let loaded = TaxonomyRepository::load(db)?;
            if loaded.sectors().is_empty() {
                crate::taxonomy::TaxonomyStore::seeded()
            } else {
                loaded
            }
        };

        Ok(Self {
            normalizer: TextNormalizer::new(crate::normalize::NormalizerConfig {
                chunk_char_budget: config.pipeline.chunk_char_budget,
                strip_boilerplate: true,
            }),
            composer: PromptComposer::new(ComposerConfig {
                bias_rules: config.bias_rules.clone(),
                domain: config.validation.domain.clone(),
            }),
            inference: InferenceClient::new(config.inference.to_client_config())
                .context("Failed to build inference client")?,
            parser: ExtractionParser::new(),
            validator: RecordValidator::new(config.validation.clone()),
            dedup: DedupEngine::new(config.dedup.clone()),
            resolver: TaxonomyResolver::new(taxonomy),
            artifacts: FsArtifactStore::new(&config.database.artifact_dir),
            db,
            model_version: config.pipeline.model_version.clone(),
            max_reference_records: config.dedup.max_reference_records,
        })
    }

    /// Process one document end to end, staging a submission on success.
    pub async fn run(&self, input: DocumentInput) -> crate::error::Result<PipelineOutcome> {
        let mut stats = RunStats::default();
        let mut artifact_paths = Vec::new();

        // 1. Normalize; an empty document is fatal for this document only
        let document = self.normalizer.normalize(&input.raw_text, input.format)?;
        stats.chunks_total = document.chunks.len();

        // Snapshot the adaptive state once per run; readers tolerate a
        // threshold change landing mid-run
        let heuristics = HeuristicsStore::load(self.db).map_err(crate::error::Error::from)?;
        let enrichment = harvest_enrichment(
            &self
                .db
                .recent_events(&input.filename, ENRICHMENT_EVENT_WINDOW)
                .map_err(crate::error::Error::from)?,
        );

        // 2-4. Compose, infer, and parse chunk by chunk
        let mut raw_records: Vec<RawRecord> = Vec::new();
        for (index, chunk) in document.chunks.iter().enumerate() {
            let prompt =
                self.composer
                    .compose(chunk, &input.filename, &heuristics, &enrichment);

            let completion = match self.inference.complete(&prompt).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(chunk = index, error = %e, "chunk inference failed; continuing");
                    stats.chunks_failed += 1;
                    continue;
                }
            };

            match self.parser.parse(&completion) {
                Ok(records) => {
                    stats.records_parsed += records.len();
                    raw_records.extend(records);
                }
                Err(failure) => {
                    stats.parse_failures += 1;
                    match self
                        .artifacts
                        .persist_parse_failure(&input.filename, &failure.raw)
                        .await
                    {
                        Ok(path) => artifact_paths.push(path),
                        Err(e) => warn!(error = %e, "failed to persist parse artifact"),
                    }
                }
            }
        }

        // Every chunk produced unusable output: the document is errored,
        // not silently empty
        if raw_records.is_empty() && stats.parse_failures > 0 && stats.parse_failures + stats.chunks_failed == stats.chunks_total
        {
            return Err(crate::error::Error::Parse(
                crate::utils::error::ParseFailure::new(
                    format!(
                        "all {} chunk(s) of {} yielded unusable output; raw text persisted",
                        stats.chunks_total, input.filename
                    ),
                    String::new(),
                ),
            ));
        }

        // 5. Validate once over the assembled record set
        let source = SourceRef {
            title: input.title.clone(),
            url: None,
            page: None,
            document_filename: input.filename.clone(),
        };
        let validated = self
            .validator
            .validate_batch(raw_records, &source, &heuristics);
        stats.rejected_empty = validated.rejected_count(RejectionReason::Empty);
        stats.rejected_placeholder = validated.rejected_count(RejectionReason::PlaceholderText);
        stats.rejected_too_short = validated.rejected_count(RejectionReason::TooShort);
        stats.rejected_out_of_domain = validated.rejected_count(RejectionReason::OutOfDomain);

        // 6. Dedup against the batch and a bounded production sample
        let reference = self
            .db
            .reference_records(self.max_reference_records)
            .map_err(crate::error::Error::from)?;
        let deduped = self.dedup.dedup(validated.records, &reference);
        stats.merged_in_batch = deduped.merged_in_batch;
        stats.matched_reference = deduped.matched_reference;

        // 7. Taxonomy resolution; a miss degrades to General, never blocks
        let mut records = deduped.records;
        for record in &mut records {
            let resolution = self.resolver.resolve(&record.text, &input.title);
            record.sector = Some(resolution.sector);
            record.subsector = resolution.subsector;
            record.discipline = resolution.discipline.or_else(|| {
                record
                    .discipline
                    .take()
                    .filter(|d| self.resolver.store().has_discipline(d))
            });
        }

        // 8. Stage as one reviewable unit
        let submission = if records.is_empty() {
            info!(
                document = %input.filename,
                chunks_failed = stats.chunks_failed,
                rejected = stats.rejected_total(),
                "document produced no stageable records"
            );
            None
        } else {
            stats.records_staged = records.len();
            let manager = SubmissionManager::new(self.db);
            Some(
                manager
                    .stage(&records, &input.filename, &self.model_version)
                    .map_err(crate::error::Error::from)?,
            )
        };

        info!(
            document = %input.filename,
            chunks = stats.chunks_total,
            chunks_failed = stats.chunks_failed,
            parsed = stats.records_parsed,
            rejected = stats.rejected_total(),
            merged = stats.merged_in_batch,
            staged = stats.records_staged,
            "document run complete"
        );

        Ok(PipelineOutcome {
            submission,
            stats,
            artifact_paths,
        })
    }
}
