//! Error type shared by layer construction and forward passes.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LayerError>;

/// Failures raised while building or evaluating a layer.
///
/// None of these are retried: they signal programming or configuration
/// mistakes and are handed back to the caller unmodified.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Hyperparameters rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A tensor does not follow the documented layout.
    #[error("invalid shape for {context}: {message}")]
    Shape {
        context: &'static str,
        message: String,
    },

    /// A token id falls outside the embedding table.
    #[error("token id {id} outside vocabulary of size {vocab_size}")]
    OutOfRange { id: i64, vocab_size: usize },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl LayerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn shape(context: &'static str, message: impl Into<String>) -> Self {
        Self::Shape {
            context,
            message: message.into(),
        }
    }
}
