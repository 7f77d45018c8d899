use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    /// The local model could not be loaded.
    #[error("embed: failed to initialize model {model} after {attempts} attempt(s): {reason}")]
    Initialization {
        model: String,
        attempts: u32,
        reason: String,
    },

    /// Missing credential, dimension mismatch, rejected request, or an
    /// unusable response shape.
    #[error("embed: {0}")]
    Configuration(String),

    /// The endpoint could not be reached, or retries were exhausted.
    #[error("embed: connection to {endpoint} failed after {attempts} attempt(s): {reason}")]
    Connection {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    /// Tokenization or model forward pass failed.
    #[error("embed: inference failed: {0}")]
    Inference(String),
}
