use std::path::PathBuf;
use std::time::Duration;

/// Default model for both the local and remote embedders (1024 dims).
pub const DEFAULT_MODEL: &str = "BAAI/bge-large-en-v1.5";

/// Builder-style configuration for embedder implementations.
///
/// Empty or unset fields mean "use the implementation default".
pub struct EmbedConfig {
    /// Model identifier (e.g. [`DEFAULT_MODEL`]).
    pub model: String,
    /// Expected embedding dimension, validated at construction when set.
    pub dimension: Option<usize>,
    /// Compute device for local inference ("cpu", "cuda" or "metal").
    pub device: String,
    /// Endpoint URL override for remote inference.
    pub base_url: String,
    /// API credential for remote inference. Falls back to the
    /// HUGGINGFACE_API_KEY environment variable when unset.
    pub api_key: Option<String>,
    /// Directory holding local model files. Falls back to the MODEL_DIR
    /// environment variable, then to `models/{model basename}`.
    pub model_dir: Option<PathBuf>,
    /// Base delay for retry backoff.
    pub retry_base_delay: Duration,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            dimension: None,
            device: String::new(),
            base_url: String::new(),
            api_key: None,
            model_dir: None,
            retry_base_delay: Duration::from_secs(2),
        }
    }
}

impl EmbedConfig {
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_dimension(mut self, dim: usize) -> Self {
        self.dimension = Some(dim);
        self
    }

    pub fn with_device(mut self, device: &str) -> Self {
        self.device = device.to_string();
        self
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}
