//! Parse-failure artifact persistence
//!
//! When the extraction parser cannot recover structure from a completion,
//! the raw model output is written alongside the document's processing
//! record, keyed by the source filename, for manual triage. The artifact
//! must be recoverable verbatim; nothing is summarized or rewritten.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

/// Store for raw-output triage artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist raw model output for the given source document.
    ///
    /// Returns the path the artifact was written to.
    async fn persist_parse_failure(&self, document_filename: &str, raw: &str) -> Result<PathBuf>;

    /// Read a previously persisted artifact back, verbatim
    async fn load_parse_failure(&self, document_filename: &str) -> Result<Option<String>>;
}

/// Filesystem-backed artifact store
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn artifact_path(&self, document_filename: &str) -> PathBuf {
        self.dir
            .join(format!("{}.parse_failure.txt", sanitize_key(document_filename)))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn persist_parse_failure(&self, document_filename: &str, raw: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create artifact directory")?;

        let path = self.artifact_path(document_filename);

        // Atomic write via temp file + rename
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, raw)
            .await
            .with_context(|| format!("Failed to write artifact: {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .context("Failed to finalize artifact")?;

        warn!(path = %path.display(), document = document_filename, "raw model output persisted for triage");
        Ok(path)
    }

    async fn load_parse_failure(&self, document_filename: &str) -> Result<Option<String>> {
        let path = self.artifact_path(document_filename);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read artifact: {}", path.display())),
        }
    }
}

/// Reduce a document filename to a safe artifact key
fn sanitize_key(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
