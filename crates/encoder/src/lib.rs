//! Transformer encoder assembled from the layers, embedding and attention crates.
//!
//! Token ids `(batch, seq)` are embedded, summed with the sinusoidal position
//! table and passed through `num_layers` pre-norm encoder blocks, producing
//! contextual features `(batch, seq, hidden_size)`.

pub mod block;
pub mod config;
pub mod error;
pub mod model;

pub use block::EncoderBlock;
pub use config::{EncoderConfig, Precision};
pub use error::EncoderError;
pub use model::Encoder;
