//! Errors raised while configuring, running or checkpointing an encoder.

use attention::AttentionError;
use layers::LayerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigFormat(String),

    /// Every violated constraint, reported together.
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Parameter file does not match the model's parameter set.
    #[error("checkpoint mismatch: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Attention(#[from] AttentionError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl From<serde_json::Error> for EncoderError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigFormat(err.to_string())
    }
}

impl From<toml::de::Error> for EncoderError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigFormat(err.to_string())
    }
}
