//! Position-wise feed-forward block.
//!
//! Hidden states shaped `(..., hidden)` are expanded to
//! `intermediate_size`, passed through the activation and dropout, then
//! contracted back to the model width:
//!
//! ```text
//! linear2(dropout(activation(linear1(x))))
//! ```
//!
//! Each position is transformed independently; nothing mixes information
//! across the sequence axis.

use candle_core::{DType, Device, Tensor, Var};

use crate::{
    activations::ActivationKind,
    checks,
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    error::{LayerError, Result},
    linear::{Linear, LinearConfig, LinearInit},
    residual::Sublayer,
};

/// Configuration for [`FeedForward`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Model hidden size (`d_model`).
    pub hidden_size: usize,
    /// Width of the activation space (`d_ff`).
    pub intermediate_size: usize,
    /// Activation applied between projections.
    pub activation: ActivationKind,
    /// Dropout applied to the activated intermediate features.
    pub dropout_p: f32,
}

impl FeedForwardConfig {
    /// Creates a ReLU feed-forward configuration without dropout.
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation: ActivationKind::default(),
            dropout_p: 0.0,
        }
    }

    pub fn with_activation(mut self, activation: ActivationKind) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = dropout_p;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 || self.intermediate_size == 0 {
            return Err(LayerError::config(format!(
                "feed-forward sizes must be non-zero, got hidden={} intermediate={}",
                self.hidden_size, self.intermediate_size
            )));
        }
        Ok(())
    }
}

/// Two-projection MLP applied independently at every position.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    linear1: Linear,
    linear2: Linear,
    dropout: Dropout,
    policy: PrecisionPolicy,
}

impl FeedForward {
    /// Builds the block with default-initialised projections.
    pub fn new(config: FeedForwardConfig, seed: u64, dtype: DType, device: &Device) -> Result<Self> {
        config.validate()?;
        let init = LinearInit::default();
        let linear1 = Linear::with_init(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            &init,
            device,
            dtype,
        )?;
        let linear2 = Linear::with_init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            &init,
            device,
            dtype,
        )?;
        Self::from_linears(config, linear1, linear2, seed)
    }

    /// Assembles the block from existing projections.
    pub fn from_linears(
        config: FeedForwardConfig,
        linear1: Linear,
        linear2: Linear,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        let expected_in = (config.hidden_size, config.intermediate_size);
        let expected_out = (config.intermediate_size, config.hidden_size);
        let got_in = (linear1.config().input_dim, linear1.config().output_dim);
        let got_out = (linear2.config().input_dim, linear2.config().output_dim);
        if got_in != expected_in || got_out != expected_out {
            return Err(LayerError::config(format!(
                "feed-forward projections {got_in:?} / {got_out:?} do not match {expected_in:?} / {expected_out:?}"
            )));
        }
        let policy = PrecisionPolicy::from_parameter_dtype(linear1.weight().dtype());
        let dropout = Dropout::new(config.dropout_p, seed)?;
        Ok(Self {
            config,
            linear1,
            linear2,
            dropout,
            policy,
        })
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn linear1(&self) -> &Linear {
        &self.linear1
    }

    pub fn linear2(&self) -> &Linear {
        &self.linear2
    }

    /// Trainable parameters named under `scope`.
    pub fn parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.linear1.parameters(&format!("{scope}.linear1"));
        params.extend(self.linear2.parameters(&format!("{scope}.linear2")));
        params
    }

    /// Applies the block to `(..., hidden_size)`; leading axes are kept.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_last_dim("feed_forward.input", hidden, self.config.hidden_size)?;
        let dims = hidden.dims();
        let rows = dims[..dims.len() - 1].iter().product::<usize>();
        let flat = hidden.reshape((rows, self.config.hidden_size))?;

        let expanded = self.linear1.forward(&flat, &self.policy)?;
        let activated = self.config.activation.apply(&expanded, &self.policy)?;
        let dropped = self.dropout.forward(&activated)?;
        let output = self.linear2.forward(&dropped, &self.policy)?;
        Ok(output.reshape(dims)?)
    }
}

impl Sublayer for FeedForward {
    fn forward(&self, normed: &Tensor) -> Result<Tensor> {
        FeedForward::forward(self, normed)
    }
}
