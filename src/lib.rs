//! Pre-norm Transformer encoder core on Candle.
//!
//! The member crates are re-exported under their own names; the most common
//! types are also available at the root.
//!
//! ```no_run
//! use candle_core::Tensor;
//! use transformer_encoder::{select_device, Encoder, EncoderConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = select_device()?;
//! let encoder = Encoder::new(EncoderConfig::new(10, 8, 2, 16, 32), &device)?;
//! let ids = Tensor::new(&[[1i64, 2, 3, 4, 0]], &device)?;
//! let features = encoder.forward(&ids, None)?;
//! assert_eq!(features.dims(), &[1, 5, 8]);
//! # Ok(())
//! # }
//! ```

pub use attention;
pub use embedding;
pub use encoder;
pub use layers;

pub use attention::{
    masks::{build_causal_mask, combine_masks, padding_mask_from_booleans, padding_mask_from_lengths},
    AttentionError, MultiHeadAttention, MultiHeadConfig,
};
pub use embedding::{PositionalEncoding, SinusoidalConfig, TokenEmbedding, TokenEmbeddingConfig};
pub use encoder::{Encoder, EncoderBlock, EncoderConfig, EncoderError, Precision};
pub use layers::{
    is_training, set_training, FeedForward, FeedForwardConfig, LayerError, LayerNorm, NormConfig,
    ResidualConfig, ResidualConnection, Sublayer, TrainingGuard,
};

use candle_core::{Device, Result};

/// Picks the compute device: CPU when `CANDLE_FORCE_CPU` is set, otherwise
/// the first CUDA device if one is available, otherwise CPU.
pub fn select_device() -> Result<Device> {
    if std::env::var("CANDLE_FORCE_CPU").is_ok() {
        log::info!("CANDLE_FORCE_CPU set, using CPU backend");
        return Ok(Device::Cpu);
    }
    let device = Device::cuda_if_available(0)?;
    if device.is_cuda() {
        log::info!("CUDA device selected: {device:?}");
    } else {
        log::info!("using CPU backend");
    }
    Ok(device)
}
