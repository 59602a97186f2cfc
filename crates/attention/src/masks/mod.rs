//! Mask utilities shared by attention implementations.
//!
//! All masks produced here are binary keep-masks with dtype [`MASK_DTYPE`]:
//! `1` where attention is permitted and `0` where the score must be replaced
//! by the configured fill value. Builders emit the smallest shape that
//! broadcasts to `[batch, num_heads, q_len, k_len]`.

pub mod causal;
pub mod padding;

use candle_core::{bail, DType, Result, Tensor};

/// Dtype shared by all keep-masks.
pub const MASK_DTYPE: DType = DType::U8;

pub use causal::build_causal_mask;
pub use padding::{padding_mask_from_booleans, padding_mask_from_lengths};

/// Intersects two keep-masks; a position survives only if both allow it.
///
/// Operands broadcast against each other, so a `(1, 1, L, L)` causal mask
/// combines with a `(batch, 1, 1, L)` padding mask into `(batch, 1, L, L)`.
pub fn combine_masks(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    if a.dtype() != MASK_DTYPE || b.dtype() != MASK_DTYPE {
        bail!(
            "keep-masks must have dtype {MASK_DTYPE:?}, got {:?} and {:?}",
            a.dtype(),
            b.dtype()
        );
    }
    a.broadcast_mul(b)
}
