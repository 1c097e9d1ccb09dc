//! Inference service adapter
//!
//! Sends composed prompts to the external text-completion service and
//! returns raw completion text. All timeout, connection, and server-error
//! handling is isolated here as typed failures; a failed chunk never takes
//! the rest of the document down with it.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::InferenceError;
use crate::utils::retry::{with_retry, RetryConfig};

/// Configuration for the inference client
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Completion endpoint URL (default: http://localhost:11434)
    pub endpoint: String,

    /// Model identifier sent with each request
    pub model: String,

    /// Request timeout in seconds.
    ///
    /// Documents can be large, so this is on the order of minutes; it is
    /// the only hard deadline in the pipeline.
    pub timeout_secs: u64,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature (0.0 - 1.0); extraction wants it low
    pub temperature: f32,

    /// Retry behavior for recoverable failures
    pub retry: RetryConfig,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            timeout_secs: 180,
            max_tokens: 4096,
            temperature: 0.1,
            retry: RetryConfig::default(),
        }
    }
}

impl InferenceConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("VIGIL_INFERENCE_ENDPOINT").unwrap_or(defaults.endpoint),
            model: std::env::var("VIGIL_INFERENCE_MODEL").unwrap_or(defaults.model),
            timeout_secs: std::env::var("VIGIL_INFERENCE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_tokens: std::env::var("VIGIL_INFERENCE_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_tokens),
            temperature: std::env::var("VIGIL_INFERENCE_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.temperature),
            retry: RetryConfig::default(),
        }
    }
}

/// Completion request body
#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

/// Completion response body
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for the external inference service
pub struct InferenceClient {
    client: Client,
    config: InferenceConfig,
}

impl InferenceClient {
    /// Create a client with the given config
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a client from environment variables
    pub fn from_env() -> Result<Self, InferenceError> {
        Self::new(InferenceConfig::from_env())
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Check whether the service answers at all
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.endpoint);
        self.client.get(&url).send().await.is_ok()
    }

    /// Send one prompt and return the raw completion text.
    ///
    /// Recoverable failures (timeout, connection refused, 5xx) are retried
    /// with bounded backoff; from the caller's perspective this is a single
    /// blocking call that either yields text or a typed failure.
    pub async fn complete(&self, prompt: &str) -> Result<String, InferenceError> {
        with_retry(
            &self.config.retry,
            || self.complete_once(prompt),
            InferenceError::is_recoverable,
        )
        .await
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, InferenceError> {
        let url = format!("{}/api/generate", self.config.endpoint);

        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        debug!(model = %self.config.model, prompt_len = prompt.len(), "sending completion request");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::ServerError(status.as_u16()));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        Ok(body.response)
    }
}

/// Map transport-level reqwest errors onto the typed failure set
fn classify_transport_error(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout
    } else if err.is_connect() {
        InferenceError::ConnectionRefused
    } else {
        InferenceError::Http(err)
    }
}
