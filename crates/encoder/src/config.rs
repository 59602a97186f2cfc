use std::{fs, path::Path};

use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::error::EncoderError;

const DEFAULT_NUM_LAYERS: usize = 1;
const DEFAULT_DROPOUT_P: f32 = 0.1;
const DEFAULT_NORM_EPSILON: f64 = 1e-6;

/// Storage precision for every parameter and activation in the encoder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    F32,
    F16,
    Bf16,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

/// Hyperparameters of an [`Encoder`](crate::Encoder).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EncoderConfig {
    pub vocab_size: usize,
    /// Model width, `d_model`.
    pub hidden_size: usize,
    pub num_heads: usize,
    /// Feed-forward inner width, `d_ff`.
    pub intermediate_size: usize,
    /// Longest sequence covered by the positional table.
    pub max_seq_len: usize,
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    /// Shared dropout probability for embeddings, attention weights,
    /// feed-forward activations and residual branches.
    #[serde(default = "default_dropout_p")]
    pub dropout_p: f32,
    #[serde(default = "default_norm_epsilon")]
    pub norm_epsilon: f64,
    #[serde(default)]
    pub precision: Precision,
    /// Seed of the dropout mask streams.
    #[serde(default)]
    pub seed: u64,
}

fn default_num_layers() -> usize {
    DEFAULT_NUM_LAYERS
}

fn default_dropout_p() -> f32 {
    DEFAULT_DROPOUT_P
}

fn default_norm_epsilon() -> f64 {
    DEFAULT_NORM_EPSILON
}

impl EncoderConfig {
    /// Configuration with default depth, dropout, epsilon, precision and seed.
    pub fn new(
        vocab_size: usize,
        hidden_size: usize,
        num_heads: usize,
        intermediate_size: usize,
        max_seq_len: usize,
    ) -> Self {
        Self {
            vocab_size,
            hidden_size,
            num_heads,
            intermediate_size,
            max_seq_len,
            num_layers: DEFAULT_NUM_LAYERS,
            dropout_p: DEFAULT_DROPOUT_P,
            norm_epsilon: DEFAULT_NORM_EPSILON,
            precision: Precision::default(),
            seed: 0,
        }
    }

    /// Loads a `.json` or `.toml` configuration and validates it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EncoderError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: EncoderConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") => toml::from_str(&contents)?,
            other => {
                return Err(EncoderError::ConfigFormat(format!(
                    "unsupported configuration extension {:?}",
                    other.unwrap_or("")
                )));
            }
        };
        config.validate()?;
        log::debug!("loaded encoder config from {}", path.display());
        Ok(config)
    }

    pub fn dtype(&self) -> DType {
        self.precision.dtype()
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads.max(1)
    }

    pub fn validate(&self) -> Result<(), EncoderError> {
        let mut errors = Vec::new();

        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("hidden_size", self.hidden_size),
            ("num_heads", self.num_heads),
            ("intermediate_size", self.intermediate_size),
            ("max_seq_len", self.max_seq_len),
            ("num_layers", self.num_layers),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than 0"));
            }
        }

        if self.num_heads > 0 && self.hidden_size % self.num_heads != 0 {
            errors.push(format!(
                "hidden_size ({}) must be divisible by num_heads ({})",
                self.hidden_size, self.num_heads
            ));
        }

        if self.hidden_size == 1 {
            errors.push("hidden_size must be at least 2 for unbiased normalisation".to_string());
        }

        if !(0.0..1.0).contains(&self.dropout_p) {
            errors.push(format!("dropout_p must be in [0, 1), got {}", self.dropout_p));
        }

        if !(self.norm_epsilon.is_finite() && self.norm_epsilon > 0.0) {
            errors.push(format!(
                "norm_epsilon must be positive and finite, got {}",
                self.norm_epsilon
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EncoderError::Validation(errors))
        }
    }
}
