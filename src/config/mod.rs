//! Configuration management for the vigil pipeline
//!
//! Configuration loads from a TOML file with environment-variable
//! overrides. Every section has working defaults: a missing file or an
//! empty rule table leaves the pipeline fully functional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dedup::DedupConfig;
use crate::extract::ValidationConfig;
use crate::learning::LearningConfig;
use crate::prompt::BiasRule;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Pipeline-stage settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Inference service settings
    #[serde(default)]
    pub inference: InferenceSettings,

    /// Deduplication settings
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Validator settings (domain tag, pattern lists, length floor)
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Learning feedback controller settings
    #[serde(default)]
    pub learning: LearningConfig,

    /// Document-bias table, matched against source filenames
    #[serde(default)]
    pub bias_rules: Vec<BiasRule>,

    /// Storage paths
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pipeline-stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Character budget per normalized chunk
    pub chunk_char_budget: usize,

    /// Version tag recorded on submissions
    pub model_version: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_char_budget: 12_000,
            model_version: "vigil-0.1".to_string(),
        }
    }
}

/// Inference service configuration (serializable settings shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: u32,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            timeout_secs: 180,
            max_tokens: 4096,
            temperature: 0.1,
            max_retries: 2,
        }
    }
}

impl InferenceSettings {
    /// Build the client-side config from these settings
    pub fn to_client_config(&self) -> crate::inference::InferenceConfig {
        crate::inference::InferenceConfig {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            timeout_secs: self.timeout_secs,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            retry: crate::utils::retry::RetryConfig::new(self.max_retries),
        }
    }
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub path: PathBuf,

    /// Directory for parse-failure artifacts
    pub artifact_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/vigil.db"),
            artifact_dir: PathBuf::from("data/artifacts"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration: file if present, then environment overrides.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::debug!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply environment-variable overrides
    fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var("VIGIL_INFERENCE_ENDPOINT") {
            self.inference.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("VIGIL_INFERENCE_MODEL") {
            self.inference.model = model;
        }
        if let Some(timeout) = env_parse("VIGIL_INFERENCE_TIMEOUT") {
            self.inference.timeout_secs = timeout;
        }
        if let Ok(path) = std::env::var("VIGIL_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("VIGIL_ARTIFACT_DIR") {
            self.database.artifact_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("VIGIL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(threshold) = env_parse("VIGIL_DEDUP_THRESHOLD") {
            self.dedup.similarity_threshold = threshold;
        }
        if let Some(len) = env_parse("VIGIL_MIN_TEXT_LEN") {
            self.validation.min_text_len = len;
        }
        if let Ok(domain) = std::env::var("VIGIL_DOMAIN") {
            self.validation.domain = domain;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.chunk_char_budget == 0 {
            anyhow::bail!("chunk_char_budget must be greater than 0");
        }
        if self.inference.timeout_secs == 0 {
            anyhow::bail!("inference timeout must be greater than 0");
        }
        self.dedup.validate()?;
        self.learning.validate()?;
        Ok(())
    }

    /// Get the inference timeout as a Duration
    #[must_use]
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference.timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
