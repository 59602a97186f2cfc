//! Embedding crate
//!
//! `token` maps integer ids to scaled dense vectors and `positional` adds the
//! fixed sinusoidal position signal on top of them.

pub mod positional;
pub mod token;

pub use positional::sinusoidal::{PositionalEncoding, SinusoidalConfig};
pub use token::{TokenEmbedding, TokenEmbeddingConfig};
