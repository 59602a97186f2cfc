//! Builders for causal attention masks.
//!
//! The resulting tensors have dtype [`MASK_DTYPE`](super::MASK_DTYPE) and shape
//! `[1, 1, seq_len, seq_len]`. Entries are `1` on and below the diagonal and
//! `0` above it.

use candle_core::{Device, Result, Tensor};

/// Construct a lower-triangular keep-mask for `seq_len` positions.
pub fn build_causal_mask(device: &Device, seq_len: usize) -> Result<Tensor> {
    let data = (0..seq_len)
        .flat_map(|q| (0..seq_len).map(move |k| u8::from(k <= q)))
        .collect::<Vec<_>>();
    Tensor::from_vec(data, (1, 1, seq_len, seq_len), device)
}
