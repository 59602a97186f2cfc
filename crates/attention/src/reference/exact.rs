//! Reference scaled dot-product attention kernel.
//!
//! The exact path prioritises numerical fidelity and follows the semantics
//! described by the [`Attention`](crate::core::Attention) trait:
//!
//! 1. `scores = q · kᵀ / sqrt(head_dim)`
//! 2. blocked positions (mask entry `0`, in any dtype) are overwritten with
//!    `mask_fill`; masks of lower rank gain leading unit axes
//! 3. `weights = softmax(scores)` over the key axis
//! 4. dropout on `weights`
//! 5. `output = weights · v`

use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;
use layers::{Dropout, PrecisionPolicy};

use crate::core::{Attention, AttentionError, Config};

/// Numerically stable, portable attention kernel.
#[derive(Debug)]
pub struct ExactAttention {
    mask_fill: f32,
    first_call: OnceLock<()>,
}

impl ExactAttention {
    /// Construct a kernel that fills blocked scores with `config.mask_fill`.
    pub fn new(config: &Config) -> Result<Self, AttentionError> {
        config.validate()?;
        Ok(Self {
            mask_fill: config.mask_fill,
            first_call: OnceLock::new(),
        })
    }

    pub fn mask_fill(&self) -> f32 {
        self.mask_fill
    }
}

impl Default for ExactAttention {
    fn default() -> Self {
        Self {
            mask_fill: Config::default().mask_fill,
            first_call: OnceLock::new(),
        }
    }
}

impl Clone for ExactAttention {
    fn clone(&self) -> Self {
        Self {
            mask_fill: self.mask_fill,
            first_call: OnceLock::new(),
        }
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        dropout: &Dropout,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::shape(
                "q, k, v must reside on the same device",
            ));
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::shape("q, k, v must share the same dtype"));
        }
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16 | DType::F64) {
            return Err(AttentionError::shape(format!(
                "unsupported attention dtype {dtype:?}"
            )));
        }

        let (batch, heads, q_len, head_dim) = q.dims4().map_err(|_| {
            AttentionError::shape("q must have shape [batch, heads, q_len, head_dim]")
        })?;
        let (kb, kh, k_len, kd) = k.dims4().map_err(|_| {
            AttentionError::shape("k must have shape [batch, heads, k_len, head_dim]")
        })?;
        let (vb, vh, vk, vd) = v.dims4().map_err(|_| {
            AttentionError::shape("v must have shape [batch, heads, k_len, head_dim]")
        })?;

        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
            )));
        }
        if vb != batch || vh != heads || vk != k_len || vd != head_dim {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_dim}] got [{vb}, {vh}, {vk}, {vd}]"
            )));
        }

        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init dtype={dtype:?} heads={heads} head_dim={head_dim} mask_fill={} dropout_p={}",
                self.mask_fill,
                dropout.probability()
            );
        }

        let policy = PrecisionPolicy::from_parameter_dtype(dtype);
        let merged = batch * heads;

        let q_view = policy
            .cast_for_matmul(q)?
            .reshape((merged, q_len, head_dim))?;
        let k_t = policy
            .cast_for_matmul(k)?
            .reshape((merged, k_len, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let scale = 1.0 / (head_dim as f64).sqrt();
        let scores = q_view
            .matmul(&k_t)?
            .affine(scale, 0.0)?
            .reshape((batch, heads, q_len, k_len))?;
        let mut scores = policy.cast_for_reduction(&scores)?;

        if let Some(mask) = mask {
            scores = self.apply_mask(&scores, mask)?;
        }

        let weights = softmax_last_dim(&scores.contiguous()?)?;
        let weights = dropout.forward(&weights)?;

        let output = policy
            .cast_for_matmul(&weights)?
            .reshape((merged, q_len, k_len))?
            .matmul(&policy.cast_for_matmul(v)?.reshape((merged, k_len, head_dim))?)?
            .reshape((batch, heads, q_len, head_dim))?;

        Ok((
            policy.cast_to_storage(&output)?,
            policy.cast_to_storage(&weights)?,
        ))
    }
}

impl ExactAttention {
    fn apply_mask(&self, scores: &Tensor, mask: &Tensor) -> Result<Tensor, AttentionError> {
        if !scores.device().same_device(mask.device()) {
            return Err(AttentionError::shape(
                "mask must reside on the same device as q",
            ));
        }
        let target = scores.dims4()?;
        let target = [target.0, target.1, target.2, target.3];
        let dims = mask.dims();
        if dims.len() > target.len() {
            return Err(AttentionError::shape(format!(
                "mask shape {dims:?} has more axes than {target:?}"
            )));
        }
        // Missing leading axes broadcast, as in elementwise broadcasting.
        let mut padded = vec![1usize; target.len() - dims.len()];
        padded.extend_from_slice(dims);
        let broadcastable = padded
            .iter()
            .zip(target.iter())
            .all(|(&m, &t)| m == 1 || m == t);
        if !broadcastable {
            return Err(AttentionError::shape(format!(
                "mask shape {dims:?} does not broadcast to {target:?}"
            )));
        }
        let mask = mask.reshape(padded)?;

        let blocked = mask
            .eq(&mask.zeros_like()?)?
            .broadcast_as(scores.shape())?
            .contiguous()?;
        let fill = Tensor::new(self.mask_fill, scores.device())?
            .to_dtype(scores.dtype())?
            .broadcast_as(scores.shape())?
            .contiguous()?;
        Ok(blocked.where_cond(&fill, scores)?)
    }
}
