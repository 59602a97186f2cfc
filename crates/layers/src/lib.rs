//! Building blocks for transformer encoder layers.
//!
//! The crate hosts normalisation, feed-forward, dropout and residual
//! components assembled from Candle primitives. Hidden states follow the
//! `(batch, seq, hidden)` convention throughout.

pub mod activations;
pub mod checks;
pub mod dropout;
pub mod dtypes;
pub mod error;
pub mod linear;
pub mod mlp;
pub mod mode;
pub mod norm;
pub mod residual;

pub use activations::ActivationKind;
pub use dropout::Dropout;
pub use dtypes::PrecisionPolicy;
pub use error::{LayerError, Result};
pub use linear::{Linear, LinearConfig, LinearInit};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use mode::{is_training, set_training, TrainingGuard};
pub use norm::{LayerNorm, NormConfig};
pub use residual::{ResidualConfig, ResidualConnection, Sublayer};
