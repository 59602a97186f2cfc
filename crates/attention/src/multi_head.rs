//! Multi-head attention over `(batch, seq, hidden)` hidden states.
//!
//! Queries, keys and values are projected by their own `hidden -> hidden`
//! linear maps, split into `num_heads` slices of width
//! `head_dim = hidden / num_heads`, attended independently by
//! [`ExactAttention`], merged back in head order and passed through the output
//! projection.

use std::sync::Mutex;

use candle_core::{DType, Device, Tensor, Var};
use layers::{
    checks, Dropout, LayerError, Linear, LinearConfig, LinearInit, PrecisionPolicy, Sublayer,
};

use crate::core::{Attention, AttentionError, Config};
use crate::reference::ExactAttention;

/// Shape and regularisation settings for [`MultiHeadAttention`].
#[derive(Debug, Clone, PartialEq)]
pub struct MultiHeadConfig {
    /// Model width (`d_model`).
    pub hidden_size: usize,
    pub num_heads: usize,
    /// Dropout on the attention weights; `Config::dropout_p` takes precedence when set.
    pub dropout_p: f32,
    /// Whether the four projections carry a bias vector.
    pub bias: bool,
}

impl MultiHeadConfig {
    pub fn new(hidden_size: usize, num_heads: usize) -> Self {
        Self {
            hidden_size,
            num_heads,
            dropout_p: 0.0,
            bias: true,
        }
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = dropout_p;
        self
    }

    /// Width of each head.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads.max(1)
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.hidden_size == 0 || self.num_heads == 0 {
            return Err(AttentionError::InvalidConfig(format!(
                "hidden_size and num_heads must be non-zero, got {} and {}",
                self.hidden_size, self.num_heads
            )));
        }
        if self.hidden_size % self.num_heads != 0 {
            return Err(AttentionError::InvalidConfig(format!(
                "hidden_size {} is not divisible by num_heads {}",
                self.hidden_size, self.num_heads
            )));
        }
        Ok(())
    }
}

/// Projections plus the exact kernel, with the last weights kept for inspection.
#[derive(Debug)]
pub struct MultiHeadAttention {
    config: MultiHeadConfig,
    w_q: Linear,
    w_k: Linear,
    w_v: Linear,
    w_o: Linear,
    kernel: ExactAttention,
    dropout: Dropout,
    policy: PrecisionPolicy,
    last_weights: Mutex<Option<Tensor>>,
}

impl MultiHeadAttention {
    /// Builds the layer with default-initialised projections.
    ///
    /// `runtime` supplies the mask fill and may override the dropout
    /// probability declared in `config`.
    pub fn new(
        config: MultiHeadConfig,
        runtime: &Config,
        seed: u64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let init = LinearInit::default();
        let projection = || {
            let mut linear = LinearConfig::new(config.hidden_size, config.hidden_size);
            linear.bias = config.bias;
            Linear::with_init(linear, &init, device, dtype)
        };
        let w_q = projection()?;
        let w_k = projection()?;
        let w_v = projection()?;
        let w_o = projection()?;
        Self::from_projections(config, runtime, [w_q, w_k, w_v, w_o], seed)
    }

    /// Assembles the layer from existing `[w_q, w_k, w_v, w_o]` projections.
    pub fn from_projections(
        config: MultiHeadConfig,
        runtime: &Config,
        projections: [Linear; 4],
        seed: u64,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        for linear in &projections {
            let shape = (linear.config().input_dim, linear.config().output_dim);
            if shape != (config.hidden_size, config.hidden_size) {
                return Err(AttentionError::InvalidConfig(format!(
                    "projection {shape:?} does not map {0} -> {0}",
                    config.hidden_size
                )));
            }
        }
        let dropout_p = runtime.dropout_p.unwrap_or(config.dropout_p);
        let dropout = Dropout::new(dropout_p, seed)?;
        let kernel = ExactAttention::new(runtime)?;
        let [w_q, w_k, w_v, w_o] = projections;
        let policy = PrecisionPolicy::from_parameter_dtype(w_q.weight().dtype());
        log::debug!(
            "multi-head attention: hidden={} heads={} head_dim={} dropout_p={dropout_p}",
            config.hidden_size,
            config.num_heads,
            config.head_dim()
        );
        Ok(Self {
            config,
            w_q,
            w_k,
            w_v,
            w_o,
            kernel,
            dropout,
            policy,
            last_weights: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MultiHeadConfig {
        &self.config
    }

    pub fn w_q(&self) -> &Linear {
        &self.w_q
    }

    pub fn w_k(&self) -> &Linear {
        &self.w_k
    }

    pub fn w_v(&self) -> &Linear {
        &self.w_v
    }

    pub fn w_o(&self) -> &Linear {
        &self.w_o
    }

    /// Trainable parameters named under `scope`.
    pub fn parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.w_q.parameters(&format!("{scope}.w_q"));
        params.extend(self.w_k.parameters(&format!("{scope}.w_k")));
        params.extend(self.w_v.parameters(&format!("{scope}.w_v")));
        params.extend(self.w_o.parameters(&format!("{scope}.w_o")));
        params
    }

    /// Weights `[batch, heads, q_len, k_len]` from the most recent forward pass.
    pub fn attention_weights(&self) -> Option<Tensor> {
        match self.last_weights.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Attends `query` `(batch, q_len, hidden)` over `key`/`value` `(batch, k_len, hidden)`.
    ///
    /// `mask` is a `{0, 1}` keep-mask broadcastable to `(batch, 1 | heads, q_len, k_len)`.
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, AttentionError> {
        let hidden = self.config.hidden_size;
        checks::expect_batch_seq_hidden("attention.query", query, hidden)?;
        checks::expect_batch_seq_hidden("attention.key", key, hidden)?;
        checks::expect_shape("attention.value", value, key.dims())?;
        let (batch, q_len, _) = query.dims3()?;
        let (key_batch, k_len, _) = key.dims3()?;
        if key_batch != batch {
            return Err(AttentionError::shape(format!(
                "query batch {batch} does not match key batch {key_batch}"
            )));
        }

        let q = self.split_heads(&self.w_q.forward(query, &self.policy)?, q_len)?;
        let k = self.split_heads(&self.w_k.forward(key, &self.policy)?, k_len)?;
        let v = self.split_heads(&self.w_v.forward(value, &self.policy)?, k_len)?;

        let (context, weights) = self.kernel.attend(&q, &k, &v, mask, &self.dropout)?;
        self.store_weights(weights);

        let merged = context
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, q_len, hidden))?;
        Ok(self.w_o.forward(&merged, &self.policy)?)
    }

    /// Adapter running this layer as self-attention inside a residual connection.
    pub fn self_attention<'a>(&'a self, mask: Option<&'a Tensor>) -> SelfAttention<'a> {
        SelfAttention {
            attention: self,
            mask,
        }
    }

    fn split_heads(&self, projected: &Tensor, seq_len: usize) -> Result<Tensor, AttentionError> {
        let (batch, _, _) = projected.dims3()?;
        let heads = self.config.num_heads;
        Ok(projected
            .reshape((batch, seq_len, heads, self.config.head_dim()))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn store_weights(&self, weights: Tensor) {
        let mut guard = match self.last_weights.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(weights);
    }
}

/// Self-attention view of a [`MultiHeadAttention`]: `q = k = v = normed`.
#[derive(Debug, Clone, Copy)]
pub struct SelfAttention<'a> {
    attention: &'a MultiHeadAttention,
    mask: Option<&'a Tensor>,
}

impl Sublayer for SelfAttention<'_> {
    fn forward(&self, normed: &Tensor) -> Result<Tensor, LayerError> {
        self.attention
            .forward(normed, normed, normed, self.mask)
            .map_err(LayerError::from)
    }
}
