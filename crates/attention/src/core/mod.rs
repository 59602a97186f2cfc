//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout
//! `[batch, n_heads, seq_len, head_dim]`. The output tensor mirrors the layout
//! of `q`, and the softmax over keys accumulates in at least `f32` regardless
//! of the incoming dtype (`bf16`, `f16`, `f32` or `f64`).

pub mod config;
pub mod errors;

use candle_core::Tensor;
use layers::Dropout;

pub use config::{Config, MAX_MASK_FILL};
pub use errors::AttentionError;

/// Unified interface for attention kernels.
///
/// * `q` is `[batch, n_heads, q_len, head_dim]`; `k` and `v` are
///   `[batch, n_heads, k_len, head_dim]`. `k_len` may differ from `q_len`.
/// * Masks, when present, are `u8` keep-masks of rank 4 whose every axis is
///   either `1` or the matching extent of `[batch, n_heads, q_len, k_len]`.
/// * `dropout` is applied to the attention weights and is the identity outside
///   training mode.
/// * Returns the attended values together with the weights
///   `[batch, n_heads, q_len, k_len]` that produced them.
pub trait Attention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        dropout: &Dropout,
    ) -> Result<(Tensor, Tensor), AttentionError>;
}
