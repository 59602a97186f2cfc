//! Error types emitted by attention implementations.

use layers::LayerError;
use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// Hyperparameters rejected at construction time.
    #[error("invalid attention configuration: {0}")]
    InvalidConfig(String),
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape: {context}")]
    InvalidShape { context: String },
    /// A failure raised by one of the wrapped layers.
    #[error(transparent)]
    Layer(#[from] LayerError),
    /// A backend-specific failure propagated to the caller.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }
}

impl From<AttentionError> for LayerError {
    fn from(err: AttentionError) -> Self {
        match err {
            AttentionError::InvalidConfig(message) => LayerError::InvalidConfig(message),
            AttentionError::InvalidShape { context } => LayerError::shape("attention", context),
            AttentionError::Layer(inner) => inner,
            AttentionError::Backend(inner) => LayerError::Candle(inner),
        }
    }
}
