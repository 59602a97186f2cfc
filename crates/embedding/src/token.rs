//! Token embedding layer scaled by the square root of the model width.

use candle_core::{DType, Device, Tensor, Var};
use layers::{checks, LayerError, PrecisionPolicy, Result};

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Storage dtype used for the underlying parameters and outputs.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

impl TokenEmbeddingConfig {
    fn policy(&self) -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(self.dtype)
    }

    fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(LayerError::InvalidConfig(
                "token embedding requires vocab_size > 0".into(),
            ));
        }
        if self.hidden_dim == 0 {
            return Err(LayerError::InvalidConfig(
                "token embedding requires hidden_dim > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Learnable `(vocab_size, hidden_dim)` lookup table.
///
/// Rows are multiplied by `sqrt(hidden_dim)` on lookup so the embedding
/// magnitude is comparable with the positional signal added afterwards.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Var,
    policy: PrecisionPolicy,
}

impl TokenEmbedding {
    /// Builds a new token embedding table and samples the parameters from `N(0, 1)`.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        config.validate()?;

        let policy = config.policy();
        let shape = (config.vocab_size, config.hidden_dim);
        let initial = Var::randn(0f32, 1f32, shape, &config.device)?;
        let weight = if initial.dtype() == config.dtype {
            initial
        } else {
            let cast = initial.to_dtype(config.dtype)?;
            Var::from_tensor(&cast)?
        };

        Ok(Self {
            config,
            weight,
            policy,
        })
    }

    /// Wraps an existing `(vocab_size, hidden_dim)` table.
    pub fn from_weight(weight: Tensor) -> Result<Self> {
        checks::expect_rank("embedding.weight", &weight, 2)?;
        let (vocab_size, hidden_dim) = weight.dims2()?;
        let config = TokenEmbeddingConfig {
            vocab_size,
            hidden_dim,
            dtype: weight.dtype(),
            device: weight.device().clone(),
        };
        config.validate()?;
        Ok(Self {
            policy: config.policy(),
            config,
            weight: Var::from_tensor(&weight)?,
        })
    }

    /// Returns the embedding configuration.
    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// Returns a handle to the underlying weight tensor.
    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    /// Trainable parameters named under `scope`.
    pub fn parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![(format!("{scope}.weight"), self.weight.clone())]
    }

    /// Looks up embeddings for the provided token ids.
    ///
    /// Inputs must be shaped `(batch, seq)` with an integer dtype. Outputs follow the
    /// `(batch, seq, hidden)` layout using the configured storage dtype.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.validate_token_ids(token_ids)?;
        let (batch, seq) = token_ids.dims2()?;

        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let gathered = self.weight.as_tensor().index_select(&flat, 0)?;
        let scale = (self.config.hidden_dim as f64).sqrt();
        let scaled = self.policy.cast_for_matmul(&gathered)?.affine(scale, 0.0)?;
        let output = scaled.reshape((batch, seq, self.config.hidden_dim))?;
        Ok(self.policy.cast_to_storage(&output)?)
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<()> {
        match token_ids.dims() {
            [batch, seq] if *batch > 0 && *seq > 0 => {}
            [_, _] => {
                return Err(LayerError::shape(
                    "token_ids",
                    "batch and seq dimensions must be non-zero",
                ))
            }
            dims => {
                return Err(LayerError::shape(
                    "token_ids",
                    format!("expected [batch, seq], got {dims:?}"),
                ))
            }
        }

        if token_ids.dtype().is_int() {
            Ok(())
        } else {
            Err(LayerError::shape(
                "token_ids",
                format!("expected integer dtype, got {:?}", token_ids.dtype()),
            ))
        }
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let vocab = self.config.vocab_size as i64;
        let ids = flat_ids.to_vec1::<i64>()?;
        match ids.iter().find(|id| **id < 0 || **id >= vocab) {
            Some(&id) => Err(LayerError::OutOfRange {
                id,
                vocab_size: self.config.vocab_size,
            }),
            None => Ok(()),
        }
    }
}
