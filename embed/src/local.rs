use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_MODEL, EmbedConfig};
use crate::embed::Embedder;
use crate::error::EmbedError;
use crate::prompt;

/// Environment variable consulted when no model directory is configured.
pub const MODEL_DIR_ENV: &str = "MODEL_DIR";

const MAX_SEQ_LEN: usize = 512;
const MAX_ATTEMPTS: u32 = 3;

/// On-device BGE-family embedder.
///
/// Loads the tokenizer and encoder weights once at construction and
/// keeps them in memory for the lifetime of the instance. Embed calls
/// run the encoder on the calling task; there is no retry after a
/// successful load.
pub struct BgeLocal {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    id: String,
}

impl BgeLocal {
    /// Loads the model described by `cfg`, blocking the calling thread.
    ///
    /// Model files are resolved from `cfg.model_dir`, then from
    /// [`MODEL_DIR_ENV`], then from `models/{model basename}`. The load
    /// is attempted up to 3 times with linear backoff; when
    /// `cfg.dimension` is set it is checked against the model's native
    /// hidden size.
    pub fn load(cfg: EmbedConfig) -> Result<Self, EmbedError> {
        let model_name = if cfg.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            cfg.model
        };
        let device = select_device(&cfg.device)?;

        let mut last_reason = String::new();
        let mut parts = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match load_parts(&model_name, cfg.model_dir.as_deref(), &device) {
                Ok(loaded) => {
                    parts = Some(loaded);
                    break;
                }
                Err(reason) => {
                    warn!(attempt, %reason, "model load failed");
                    last_reason = reason;
                    if attempt < MAX_ATTEMPTS {
                        std::thread::sleep(cfg.retry_base_delay * attempt);
                    }
                }
            }
        }
        let Some((model, tokenizer, hidden_size)) = parts else {
            return Err(EmbedError::Initialization {
                model: model_name,
                attempts: MAX_ATTEMPTS,
                reason: last_reason,
            });
        };

        if let Some(expected) = cfg.dimension {
            if expected != hidden_size {
                return Err(EmbedError::Configuration(format!(
                    "model {model_name} produces embeddings with {hidden_size} dimensions, \
                     but {expected} were requested"
                )));
            }
        }

        info!(model = %model_name, dim = hidden_size, "embedding model loaded");
        Ok(Self {
            model,
            tokenizer,
            device,
            dim: hidden_size,
            id: model_name,
        })
    }

    /// Tokenizes one prompt-wrapped text and runs the encoder.
    ///
    /// Token states are mean-pooled and L2-normalized. Inputs are
    /// truncated to the model's maximum sequence length and submitted
    /// unpadded, so every position is a real token.
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let start = Instant::now();
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbedError::Inference(format!("tokenization failed: {e}")))?;

        let mut ids: Vec<u32> = encoding.get_ids().to_vec();
        ids.truncate(MAX_SEQ_LEN);
        let seq_len = ids.len();

        let forward = || -> candle_core::Result<Vec<f32>> {
            let input_ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
            let token_type_ids = input_ids.zeros_like()?;
            let hidden = self.model.forward(&input_ids, &token_type_ids, None)?;

            let pooled = (hidden.sum(1)? / (seq_len as f64))?;
            let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
            pooled.broadcast_div(&norm)?.squeeze(0)?.to_vec1::<f32>()
        };

        let vector = forward().map_err(|e| EmbedError::Inference(e.to_string()))?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, seq_len, "embedded text");
        Ok(vector)
    }
}

impl std::fmt::Debug for BgeLocal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BgeLocal")
            .field("device", &self.device)
            .field("dim", &self.dim)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Embedder for BgeLocal {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.encode(&prompt::wrap(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.encode(&prompt::wrap(t))).collect()
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn id(&self) -> &str {
        &self.id
    }
}

fn select_device(selector: &str) -> Result<Device, EmbedError> {
    match selector {
        "" | "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0)
            .map_err(|e| EmbedError::Configuration(format!("failed to initialize CUDA device: {e}"))),
        "metal" => Device::new_metal(0)
            .map_err(|e| EmbedError::Configuration(format!("failed to initialize Metal device: {e}"))),
        other => Err(EmbedError::Configuration(format!(
            "unknown device {other:?} (expected cpu, cuda or metal)"
        ))),
    }
}

/// Resolution order: explicit config, [`MODEL_DIR_ENV`], `models/{name}`.
fn resolve_model_dir(
    model_name: &str,
    explicit: Option<&Path>,
) -> std::result::Result<PathBuf, String> {
    if let Some(dir) = explicit {
        if dir.exists() {
            return Ok(dir.to_path_buf());
        }
        return Err(format!("model directory {} does not exist", dir.display()));
    }

    if let Ok(dir) = std::env::var(MODEL_DIR_ENV) {
        let dir = PathBuf::from(dir);
        if dir.exists() {
            return Ok(dir);
        }
        return Err(format!(
            "{MODEL_DIR_ENV} points to missing directory {}",
            dir.display()
        ));
    }

    let name = model_name.rsplit('/').next().unwrap_or(model_name);
    let fallback = Path::new("models").join(name);
    if fallback.exists() {
        return Ok(fallback);
    }
    Err(format!(
        "could not locate model files for {model_name} (tried {})",
        fallback.display()
    ))
}

fn load_parts(
    model_name: &str,
    model_dir: Option<&Path>,
    device: &Device,
) -> std::result::Result<(BertModel, Tokenizer, usize), String> {
    let dir = resolve_model_dir(model_name, model_dir)?;

    let tokenizer_path = dir.join("tokenizer.json");
    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| format!("failed to load tokenizer from {}: {e}", tokenizer_path.display()))?;

    let config_path = dir.join("config.json");
    let config_text = std::fs::read_to_string(&config_path)
        .map_err(|e| format!("failed to read {}: {e}", config_path.display()))?;
    let config: BertConfig = serde_json::from_str(&config_text)
        .map_err(|e| format!("failed to parse {}: {e}", config_path.display()))?;

    let vb = load_weights(&dir, device)?;
    let hidden_size = config.hidden_size;
    let model = BertModel::load(vb, &config).map_err(|e| format!("failed to build model: {e}"))?;

    Ok((model, tokenizer, hidden_size))
}

/// Prefers `model.safetensors`, falling back to `pytorch_model.bin`.
fn load_weights(dir: &Path, device: &Device) -> std::result::Result<VarBuilder<'static>, String> {
    let safetensors = dir.join("model.safetensors");
    if safetensors.exists() {
        // SAFETY: the weight file is mapped read-only and not mutated
        // while the model holds it.
        return unsafe { VarBuilder::from_mmaped_safetensors(&[safetensors], DTYPE, device) }
            .map_err(|e| format!("failed to load weights: {e}"));
    }

    let pickle = dir.join("pytorch_model.bin");
    let tensors = candle_core::pickle::read_all(&pickle)
        .map_err(|e| format!("failed to read weights from {}: {e}", pickle.display()))?;
    let tensors: HashMap<String, Tensor> = tensors.into_iter().collect();
    Ok(VarBuilder::from_tensors(tensors, DTYPE, device))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn select_device_defaults_to_cpu() {
        assert!(matches!(select_device("").unwrap(), Device::Cpu));
        assert!(matches!(select_device("cpu").unwrap(), Device::Cpu));
    }

    #[test]
    fn select_device_rejects_unknown() {
        let err = select_device("tpu").unwrap_err();
        assert!(matches!(err, EmbedError::Configuration(_)), "got {err}");
    }

    #[test]
    fn resolve_model_dir_prefers_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_model_dir("BAAI/bge-large-en-v1.5", Some(dir.path())).unwrap();
        assert_eq!(resolved, dir.path());
    }

    #[test]
    fn resolve_model_dir_rejects_missing_explicit() {
        let missing = Path::new("/nonexistent/bge");
        let err = resolve_model_dir("BAAI/bge-large-en-v1.5", Some(missing)).unwrap_err();
        assert!(err.contains("does not exist"), "got {err}");
    }

    #[test]
    fn load_gives_up_after_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EmbedConfig::default()
            .with_model_dir(dir.path())
            .with_retry_base_delay(Duration::from_millis(1));

        let err = BgeLocal::load(cfg).unwrap_err();
        match err {
            EmbedError::Initialization { attempts, reason, .. } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("tokenizer"), "got {reason}");
            }
            other => panic!("expected Initialization, got {other}"),
        }
    }

    #[tokio::test]
    #[ignore] // needs model files; point MODEL_DIR at a BGE checkout
    async fn embed_returns_normalized_vector_of_model_dimension() {
        let model = BgeLocal::load(EmbedConfig::default()).unwrap();
        let vector = model.embed("what is a solar charge controller").await.unwrap();
        assert_eq!(vector.len(), model.dimension());

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3, "not normalized: {norm}");
    }

    #[tokio::test]
    #[ignore] // needs model files; point MODEL_DIR at a BGE checkout
    async fn load_rejects_dimension_mismatch() {
        let err = BgeLocal::load(EmbedConfig::default().with_dimension(3)).unwrap_err();
        assert!(matches!(err, EmbedError::Configuration(_)), "got {err}");
    }
}
