use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{DEFAULT_MODEL, EmbedConfig};
use crate::embed::Embedder;
use crate::error::EmbedError;
use crate::prompt;

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "HUGGINGFACE_API_KEY";

const HF_INFERENCE_BASE_URL: &str = "https://api-inference.huggingface.co/models";
const HF_MAX_BATCH: usize = 10;
const MAX_ATTEMPTS: u32 = 3;
const PROBE_SENTENCE: &str = "This is a test sentence.";
const ID_PREFIX: &str = "huggingface-api";

/// HuggingFace Inference API request body.
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    inputs: &'a [String],
}

/// HuggingFace embedder using the hosted Inference API.
///
/// Construction probes the endpoint once to validate the credential and
/// the reported embedding dimension. Embed calls split inputs into
/// chunks of at most 10 texts, one request per chunk, and retry each
/// request up to 3 times on rate limiting and transport failures.
#[derive(Debug)]
pub struct HuggingFace {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    dim: usize,
    id: String,
    retry_base_delay: Duration,
}

impl HuggingFace {
    /// Connects with the default model, taking the credential explicitly.
    pub async fn with_api_key(api_key: &str) -> Result<Self, EmbedError> {
        Self::connect(EmbedConfig::default().with_api_key(api_key)).await
    }

    /// Connects to the inference endpoint described by `cfg`.
    ///
    /// The credential is resolved from `cfg.api_key`, then from
    /// [`API_KEY_ENV`]; without either this fails before any network
    /// traffic. The endpoint is `cfg.base_url` or the hosted inference
    /// URL for the model. A single non-retried probe request validates
    /// connectivity and, when `cfg.dimension` is set, the embedding
    /// dimension the service reports.
    pub async fn connect(cfg: EmbedConfig) -> Result<Self, EmbedError> {
        let api_key = match cfg.api_key {
            Some(key) => key,
            None => std::env::var(API_KEY_ENV).map_err(|_| {
                EmbedError::Configuration(format!(
                    "API key is required: pass one in EmbedConfig or set {API_KEY_ENV}"
                ))
            })?,
        };

        let model = if cfg.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            cfg.model
        };

        let endpoint = if cfg.base_url.is_empty() {
            format!("{HF_INFERENCE_BASE_URL}/{model}")
        } else {
            cfg.base_url
        };

        let mut embedder = Self {
            client: Client::new(),
            api_key,
            endpoint,
            id: format!("{ID_PREFIX}:{model}"),
            model,
            dim: 0,
            retry_base_delay: cfg.retry_base_delay,
        };

        let probe = embedder.probe().await?;
        match cfg.dimension {
            Some(expected) if expected != probe.len() => {
                return Err(EmbedError::Configuration(format!(
                    "model {} produces embeddings with {} dimensions, but {} were requested",
                    embedder.model,
                    probe.len(),
                    expected
                )));
            }
            Some(expected) => embedder.dim = expected,
            None => embedder.dim = probe.len(),
        }

        debug!(model = %embedder.model, dim = embedder.dim, "connected to inference endpoint");
        Ok(embedder)
    }

    /// Submits the fixed probe sentence. One attempt, no retry.
    async fn probe(&self) -> Result<Vec<f32>, EmbedError> {
        let inputs = vec![PROBE_SENTENCE.to_string()];
        let response = self
            .send_request(&inputs)
            .await
            .map_err(|e| self.connection_error(1, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.connection_error(1, format!("probe failed with status {status}: {body}")));
        }

        let mut vectors = Self::decode(response, inputs.len()).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Configuration("probe returned no embedding".to_string()))
    }

    /// Posts one batch, retrying per the rate-limit and transport policy.
    ///
    /// Rate limiting (429) backs off `retry_base_delay * 2 * attempt`;
    /// transport failures back off `retry_base_delay * attempt`. Any
    /// other non-success status fails immediately.
    async fn call_api(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut last_reason = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.send_request(inputs).await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        last_reason = format!("rate limited (status {status})");
                        if attempt < MAX_ATTEMPTS {
                            let delay = self.retry_base_delay * 2 * attempt;
                            warn!(attempt, ?delay, "rate limited, backing off");
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(EmbedError::Configuration(format!(
                            "request failed with status {status}: {body}"
                        )));
                    }
                    return Self::decode(response, inputs.len()).await;
                }
                Err(e) => {
                    last_reason = e.to_string();
                    if attempt < MAX_ATTEMPTS {
                        let delay = self.retry_base_delay * attempt;
                        warn!(attempt, ?delay, "request failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(self.connection_error(MAX_ATTEMPTS, last_reason))
    }

    async fn send_request(&self, inputs: &[String]) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&EmbeddingRequest { inputs })
            .send()
            .await
    }

    /// Decodes a success response, requiring exactly one vector per input.
    ///
    /// Anything else (token-level matrices, extra or missing rows) is
    /// rejected rather than truncated.
    async fn decode(response: reqwest::Response, expected: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
        let vectors: Vec<Vec<f32>> = response
            .json()
            .await
            .map_err(|e| EmbedError::Configuration(format!("unusable embedding response: {e}")))?;

        if vectors.len() != expected {
            return Err(EmbedError::Configuration(format!(
                "endpoint returned {} embeddings for a batch of {}",
                vectors.len(),
                expected
            )));
        }
        Ok(vectors)
    }

    fn connection_error(&self, attempts: u32, reason: String) -> EmbedError {
        EmbedError::Connection {
            endpoint: self.endpoint.clone(),
            attempts,
            reason,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for HuggingFace {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let inputs = vec![prompt::wrap(text)];
        let mut vectors = self.call_api(&inputs).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Configuration("endpoint returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = prompt::wrap_all(texts);
        let mut result = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(HF_MAX_BATCH) {
            let vectors = self.call_api(chunk).await?;
            result.extend(vectors);
        }
        Ok(result)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn id(&self) -> &str {
        &self.id
    }
}
