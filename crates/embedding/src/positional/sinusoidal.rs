//! Fixed sinusoidal positional encoding.
//!
//! The table is computed once at construction and never trained:
//!
//! ```text
//! pe[pos, 2i]     = sin(pos / base^(2i / d))
//! pe[pos, 2i + 1] = cos(pos / base^(2i / d))
//! ```
//!
//! It is stored as a plain tensor shaped `(1, max_seq_len, d)` so it
//! broadcasts over the batch axis. When `d` is odd the trailing column holds a
//! sine term without a cosine partner.

use candle_core::{DType, Device, Tensor};
use layers::{checks, Dropout, LayerError, Result};

/// Configuration for [`PositionalEncoding`].
#[derive(Debug, Clone, PartialEq)]
pub struct SinusoidalConfig {
    /// Longest sequence the table covers.
    pub max_seq_len: usize,
    /// Width of each position vector; must match the token embedding width.
    pub hidden_dim: usize,
    /// Dropout applied to `x + pe` while training.
    pub dropout_p: f32,
    /// Wavelength base of the geometric frequency progression.
    pub base: f64,
}

impl SinusoidalConfig {
    pub fn new(max_seq_len: usize, hidden_dim: usize) -> Self {
        Self {
            max_seq_len,
            hidden_dim,
            dropout_p: 0.0,
            base: 10_000.0,
        }
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = dropout_p;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_seq_len == 0 || self.hidden_dim == 0 {
            return Err(LayerError::InvalidConfig(format!(
                "positional encoding needs non-zero sizes, got max_seq_len={} hidden_dim={}",
                self.max_seq_len, self.hidden_dim
            )));
        }
        if !(self.base.is_finite() && self.base > 1.0) {
            return Err(LayerError::InvalidConfig(format!(
                "positional encoding base must be finite and > 1, got {}",
                self.base
            )));
        }
        Ok(())
    }
}

/// Adds the precomputed position table to embedded sequences.
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    config: SinusoidalConfig,
    table: Tensor,
    dropout: Dropout,
}

impl PositionalEncoding {
    pub fn new(config: SinusoidalConfig, seed: u64, dtype: DType, device: &Device) -> Result<Self> {
        config.validate()?;
        let table = build_table(&config, device)?.to_dtype(dtype)?;
        let dropout = Dropout::new(config.dropout_p, seed)?;
        log::debug!(
            "positional table built: max_seq_len={} hidden_dim={}",
            config.max_seq_len,
            config.hidden_dim
        );
        Ok(Self {
            config,
            table,
            dropout,
        })
    }

    pub fn config(&self) -> &SinusoidalConfig {
        &self.config
    }

    /// The full `(1, max_seq_len, hidden_dim)` table.
    pub fn table(&self) -> &Tensor {
        &self.table
    }

    /// Returns `dropout(x + pe[:, :seq])` for `x` shaped `(batch, seq, hidden_dim)`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("positional.input", x, self.config.hidden_dim)?;
        let (_, seq, _) = x.dims3()?;
        if seq > self.config.max_seq_len {
            return Err(LayerError::shape(
                "positional.input",
                format!(
                    "sequence length {seq} exceeds max_seq_len {}",
                    self.config.max_seq_len
                ),
            ));
        }
        let positions = self.table.narrow(1, 0, seq)?.to_dtype(x.dtype())?;
        let summed = x.broadcast_add(&positions)?;
        self.dropout.forward(&summed)
    }
}

fn build_table(config: &SinusoidalConfig, device: &Device) -> Result<Tensor> {
    let dim = config.hidden_dim;
    let inv_freqs = (0..dim.div_ceil(2))
        .map(|idx| {
            let exponent = (2 * idx) as f64 / dim as f64;
            config.base.powf(-exponent)
        })
        .collect::<Vec<_>>();

    let mut data = Vec::with_capacity(config.max_seq_len * dim);
    for pos in 0..config.max_seq_len {
        let pos_f = pos as f64;
        for col in 0..dim {
            let angle = pos_f * inv_freqs[col / 2];
            let value = if col % 2 == 0 { angle.sin() } else { angle.cos() };
            data.push(value as f32);
        }
    }
    Ok(Tensor::from_vec(data, (1, config.max_seq_len, dim), device)?)
}
