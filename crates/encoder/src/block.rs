use candle_core::{Device, Tensor, Var};

use attention::{Config as AttentionConfig, MultiHeadAttention, MultiHeadConfig};
use layers::{FeedForward, FeedForwardConfig, ResidualConfig, ResidualConnection};

use crate::{config::EncoderConfig, error::EncoderError};

/// One pre-norm encoder layer:
///
/// ```text
/// x = x + dropout(self_attention(norm_attn(x), mask))
/// x = x + dropout(feed_forward(norm_ffn(x)))
/// ```
#[derive(Debug)]
pub struct EncoderBlock {
    attention: MultiHeadAttention,
    feed_forward: FeedForward,
    residual_attn: ResidualConnection,
    residual_ffn: ResidualConnection,
}

impl EncoderBlock {
    /// Builds layer `index` of an encoder described by `config`.
    pub fn new(
        index: usize,
        config: &EncoderConfig,
        runtime: &AttentionConfig,
        device: &Device,
    ) -> Result<Self, EncoderError> {
        let dtype = config.dtype();
        let seed = |slot: u64| derive_seed(config.seed, index as u64 * 4 + slot + 1);

        let attention = MultiHeadAttention::new(
            MultiHeadConfig::new(config.hidden_size, config.num_heads)
                .with_dropout(config.dropout_p),
            runtime,
            seed(0),
            dtype,
            device,
        )?;
        let feed_forward = FeedForward::new(
            FeedForwardConfig::new(config.hidden_size, config.intermediate_size)
                .with_dropout(config.dropout_p),
            seed(1),
            dtype,
            device,
        )?;
        let residual = ResidualConfig::new(config.hidden_size)
            .with_dropout(config.dropout_p)
            .with_epsilon(config.norm_epsilon);
        let residual_attn = ResidualConnection::new(residual.clone(), seed(2), dtype, device)?;
        let residual_ffn = ResidualConnection::new(residual, seed(3), dtype, device)?;

        Ok(Self {
            attention,
            feed_forward,
            residual_attn,
            residual_ffn,
        })
    }

    pub fn attention(&self) -> &MultiHeadAttention {
        &self.attention
    }

    pub fn feed_forward(&self) -> &FeedForward {
        &self.feed_forward
    }

    /// Runs the block over `(batch, seq, hidden)` states with an optional keep-mask.
    pub fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, EncoderError> {
        let hidden = self
            .residual_attn
            .forward(hidden, &self.attention.self_attention(mask))?;
        Ok(self.residual_ffn.forward(&hidden, &self.feed_forward)?)
    }

    /// Trainable parameters named under `scope`.
    pub fn parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.attention.parameters(&format!("{scope}.attention"));
        params.extend(self.feed_forward.parameters(&format!("{scope}.feed_forward")));
        params.extend(self.residual_attn.parameters(&format!("{scope}.residual_attn")));
        params.extend(self.residual_ffn.parameters(&format!("{scope}.residual_ffn")));
        params
    }

    /// Attention weights from this block's most recent forward pass.
    pub fn attention_weights(&self) -> Option<Tensor> {
        self.attention.attention_weights()
    }
}

/// Splits one configured seed into independent dropout streams.
pub(crate) fn derive_seed(base: u64, stream: u64) -> u64 {
    base ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
