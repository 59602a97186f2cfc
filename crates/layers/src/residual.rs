//! Pre-norm residual connection around an arbitrary sublayer.
//!
//! For an input `x` shaped `(batch, seq, hidden)` the connection computes
//!
//! ```text
//! x + dropout(sublayer(norm(x)))
//! ```
//!
//! The sublayer sees the normalised input exactly once per call, while the
//! skip path carries the original, un-normalised `x`.

use candle_core::{DType, Device, Tensor, Var};

use crate::{
    checks,
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    error::{LayerError, Result},
    norm::{LayerNorm, NormConfig},
};

/// A transformation that can sit inside a [`ResidualConnection`].
///
/// Implementations must preserve the `(batch, seq, hidden)` shape of their
/// input.
pub trait Sublayer {
    fn forward(&self, normed: &Tensor) -> Result<Tensor>;
}

impl<F> Sublayer for F
where
    F: Fn(&Tensor) -> Result<Tensor>,
{
    fn forward(&self, normed: &Tensor) -> Result<Tensor> {
        self(normed)
    }
}

/// Configuration describing a residual connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualConfig {
    /// Width of the normalised hidden states.
    pub hidden_size: usize,
    /// Dropout probability applied to the sublayer output while training.
    pub dropout_p: f32,
    /// Epsilon forwarded to the owned [`LayerNorm`].
    pub epsilon: f64,
    /// Optional factor multiplying the branch before the addition.
    pub residual_scale: Option<f32>,
}

impl ResidualConfig {
    /// Creates a configuration with no dropout and no branch scaling.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            dropout_p: 0.0,
            epsilon: 1e-6,
            residual_scale: None,
        }
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = dropout_p;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    fn norm_config(&self) -> NormConfig {
        NormConfig {
            epsilon: self.epsilon,
            ..NormConfig::new(self.hidden_size)
        }
    }
}

/// Owns the layer norm and dropout wrapped around one sublayer.
#[derive(Debug, Clone)]
pub struct ResidualConnection {
    config: ResidualConfig,
    norm: LayerNorm,
    dropout: Dropout,
    policy: PrecisionPolicy,
}

impl ResidualConnection {
    pub fn new(config: ResidualConfig, seed: u64, dtype: DType, device: &Device) -> Result<Self> {
        if let Some(scale) = config.residual_scale {
            if !scale.is_finite() {
                return Err(LayerError::config(format!(
                    "residual scale must be finite, got {scale}"
                )));
            }
        }
        let norm = LayerNorm::new(config.norm_config(), dtype, device)?;
        let dropout = Dropout::new(config.dropout_p, seed)?;
        Ok(Self {
            config,
            norm,
            dropout,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        })
    }

    pub fn config(&self) -> &ResidualConfig {
        &self.config
    }

    pub fn norm(&self) -> &LayerNorm {
        &self.norm
    }

    /// Trainable parameters named under `scope`; only the norm carries any.
    pub fn parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.norm.parameters(&format!("{scope}.norm"))
    }

    /// Runs `sublayer` on the normalised input and adds the result to `x`.
    pub fn forward<S>(&self, x: &Tensor, sublayer: &S) -> Result<Tensor>
    where
        S: Sublayer + ?Sized,
    {
        let normed = self.norm.forward(x, &self.policy)?;
        let branch = sublayer.forward(&normed)?;
        checks::expect_shape("residual.branch", &branch, x.dims())?;
        checks::expect_same_dtype("residual.branch", &branch, "residual.input", x)?;

        let branch = self.dropout.forward(&branch)?;
        let branch = match self.config.residual_scale {
            Some(scale) => branch.affine(f64::from(scale), 0.0)?,
            None => branch,
        };

        let sum = self
            .policy
            .cast_for_matmul(x)?
            .add(&self.policy.cast_for_matmul(&branch)?)?;
        Ok(self.policy.cast_to_storage(&sum)?)
    }
}
