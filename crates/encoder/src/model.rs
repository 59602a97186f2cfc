use std::{collections::HashMap, path::Path, sync::OnceLock};

use attention::Config as AttentionConfig;
use candle_core::{Device, Tensor, Var};
use embedding::{PositionalEncoding, SinusoidalConfig, TokenEmbedding, TokenEmbeddingConfig};

use crate::{
    block::{derive_seed, EncoderBlock},
    config::EncoderConfig,
    error::EncoderError,
};

/// Token ids in, contextual features out.
///
/// ```text
/// ids -> token embedding (x sqrt(d_model)) -> + positional table -> dropout
///     -> num_layers x EncoderBlock -> (batch, seq, d_model)
/// ```
#[derive(Debug)]
pub struct Encoder {
    config: EncoderConfig,
    device: Device,
    embedding: TokenEmbedding,
    positional: PositionalEncoding,
    layers: Vec<EncoderBlock>,
    first_forward: OnceLock<()>,
}

impl Encoder {
    /// Builds the encoder with freshly initialised parameters.
    ///
    /// `ATTENTION_DROPOUT` and `ATTENTION_MASK_FILL` from the environment take
    /// precedence over the configured attention dropout and the default fill.
    pub fn new(config: EncoderConfig, device: &Device) -> Result<Self, EncoderError> {
        config.validate()?;
        let dtype = config.dtype();
        let runtime = AttentionConfig::from_env()?;

        let embedding = TokenEmbedding::new(TokenEmbeddingConfig {
            vocab_size: config.vocab_size,
            hidden_dim: config.hidden_size,
            dtype,
            device: device.clone(),
        })?;
        let positional = PositionalEncoding::new(
            SinusoidalConfig::new(config.max_seq_len, config.hidden_size)
                .with_dropout(config.dropout_p),
            derive_seed(config.seed, 0),
            dtype,
            device,
        )?;
        let layers = (0..config.num_layers)
            .map(|index| EncoderBlock::new(index, &config, &runtime, device))
            .collect::<Result<Vec<_>, _>>()?;

        let encoder = Self {
            config,
            device: device.clone(),
            embedding,
            positional,
            layers,
            first_forward: OnceLock::new(),
        };
        log::debug!(
            "encoder built: layers={} parameters={}",
            encoder.layers.len(),
            encoder.num_parameters()
        );
        Ok(encoder)
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn embedding(&self) -> &TokenEmbedding {
        &self.embedding
    }

    pub fn positional(&self) -> &PositionalEncoding {
        &self.positional
    }

    pub fn layers(&self) -> &[EncoderBlock] {
        &self.layers
    }

    /// Encodes `token_ids` `(batch, seq)` into `(batch, seq, hidden_size)` features.
    ///
    /// `mask` is an optional `{0, 1}` keep-mask broadcastable to
    /// `(batch, num_heads, seq, seq)`, such as a padding mask `(batch, 1, 1, seq)`.
    pub fn forward(&self, token_ids: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, EncoderError> {
        if self.first_forward.set(()).is_ok() {
            log::info!(
                "encoder init layers={} hidden={} heads={} ff={} precision={:?} training={}",
                self.config.num_layers,
                self.config.hidden_size,
                self.config.num_heads,
                self.config.intermediate_size,
                self.config.precision,
                layers::is_training()
            );
        }

        let embedded = self.embedding.forward(token_ids)?;
        let mut hidden = self.positional.forward(&embedded)?;
        for block in &self.layers {
            hidden = block.forward(&hidden, mask)?;
        }
        Ok(hidden)
    }

    /// Every learnable parameter with a stable hierarchical name.
    ///
    /// The positional table is fixed and therefore absent.
    pub fn parameters(&self) -> Vec<(String, Var)> {
        let mut params = self.embedding.parameters("embedding");
        for (index, block) in self.layers.iter().enumerate() {
            params.extend(block.parameters(&format!("layers.{index}")));
        }
        params
    }

    /// Total number of learnable scalars.
    pub fn num_parameters(&self) -> usize {
        self.parameters()
            .iter()
            .map(|(_, var)| var.as_tensor().elem_count())
            .sum()
    }

    /// Attention weights from the most recent forward pass of layer `layer`.
    ///
    /// `None` when the index is out of range or the layer has not run yet.
    pub fn attention_weights(&self, layer: usize) -> Option<Tensor> {
        self.layers.get(layer)?.attention_weights()
    }

    /// Writes every parameter to a safetensors file.
    pub fn save_parameters(&self, path: impl AsRef<Path>) -> Result<(), EncoderError> {
        let path = path.as_ref();
        let tensors = self
            .parameters()
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect::<HashMap<_, _>>();
        candle_core::safetensors::save(&tensors, path).map_err(|err| {
            EncoderError::Checkpoint(format!(
                "failed to serialize parameters to {}: {err}",
                path.display()
            ))
        })?;
        log::debug!("saved {} tensors to {}", tensors.len(), path.display());
        Ok(())
    }

    /// Restores parameters from a safetensors file written by [`Self::save_parameters`].
    ///
    /// Names and shapes must match exactly; missing, unused or mis-shaped
    /// tensors are rejected. Values are cast to each parameter's dtype.
    pub fn load_parameters(&self, path: impl AsRef<Path>) -> Result<(), EncoderError> {
        let path = path.as_ref();
        let mut by_name = candle_core::safetensors::load(path, &self.device)?;

        let params = self.parameters();
        let mut staged = Vec::with_capacity(params.len());
        for (name, var) in params {
            let tensor = by_name.remove(&name).ok_or_else(|| {
                EncoderError::Checkpoint(format!("missing parameter {name}"))
            })?;
            if tensor.dims() != var.as_tensor().dims() {
                return Err(EncoderError::Checkpoint(format!(
                    "parameter {name} has shape {:?}, expected {:?}",
                    tensor.dims(),
                    var.as_tensor().dims()
                )));
            }
            let tensor = tensor.to_dtype(var.as_tensor().dtype())?;
            staged.push((var, tensor));
        }

        if !by_name.is_empty() {
            let mut extra = by_name.into_keys().collect::<Vec<_>>();
            extra.sort();
            return Err(EncoderError::Checkpoint(format!(
                "unused parameters: {}",
                extra.join(", ")
            )));
        }

        for (var, tensor) in staged {
            var.set(&tensor)?;
        }
        log::debug!("loaded parameters from {}", path.display());
        Ok(())
    }
}
