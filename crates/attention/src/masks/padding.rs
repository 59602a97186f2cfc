//! Builders for padding masks used to drop padded keys.
//!
//! Padding masks are shaped `[batch, 1, 1, k_len]` and broadcast over heads
//! and queries.

use candle_core::{bail, Device, Result, Tensor};

use super::MASK_DTYPE;

/// Construct padding masks from per-batch valid key lengths.
///
/// Keys at or beyond `key_lengths[b]` are blocked; lengths longer than
/// `k_len` are clamped.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    k_len: usize,
) -> Result<Tensor> {
    let batch = key_lengths.len();
    let data = key_lengths
        .iter()
        .flat_map(|&valid| {
            let valid = valid.min(k_len);
            (0..k_len).map(move |k| u8::from(k < valid))
        })
        .collect::<Vec<_>>();
    Tensor::from_vec(data, (batch, 1, 1, k_len), device)
}

/// Construct padding masks from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and must share the same
/// length. `true` indicates a padded (blocked) key position.
pub fn padding_mask_from_booleans(device: &Device, padding: &[Vec<bool>]) -> Result<Tensor> {
    let Some(first) = padding.first() else {
        return Tensor::zeros((0, 1, 1, 0), MASK_DTYPE, device);
    };
    let k_len = first.len();
    if let Some(bad) = padding.iter().find(|row| row.len() != k_len) {
        bail!(
            "all boolean padding masks must share k_len {k_len}, found {}",
            bad.len()
        );
    }

    let data = padding
        .iter()
        .flat_map(|row| row.iter().map(|&is_padding| u8::from(!is_padding)))
        .collect::<Vec<_>>();
    Tensor::from_vec(data, (padding.len(), 1, 1, k_len), device)
}
