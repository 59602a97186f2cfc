//! Inverted dropout with a seeded, reproducible mask generator.
//!
//! Dropout is the only stochastic element in the encoder. It is active only
//! while the process-wide training flag is set (see [`crate::mode`]); in
//! evaluation mode, or when the probability is zero, it returns its input
//! unchanged. Kept elements are rescaled by `1 / (1 - p)` so activations keep
//! their expected magnitude.

use std::{fmt, sync::Mutex};

use candle_core::{DType, Tensor};
use rand::{distributions::Bernoulli, rngs::StdRng, Rng, SeedableRng};

use crate::{
    error::{LayerError, Result},
    mode,
};

/// Dropout policy applied to a tensor of any rank.
pub struct Dropout {
    probability: f32,
    rng: Mutex<StdRng>,
}

impl Clone for Dropout {
    fn clone(&self) -> Self {
        let state = match self.rng.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Self {
            probability: self.probability,
            rng: Mutex::new(state),
        }
    }
}

impl fmt::Debug for Dropout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dropout")
            .field("probability", &self.probability)
            .finish()
    }
}

impl Dropout {
    /// Builds a dropout layer; `probability` must lie in `[0, 1)`.
    pub fn new(probability: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(LayerError::config(format!(
                "dropout probability must be in [0, 1), got {probability}"
            )));
        }
        Ok(Self {
            probability,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    /// A dropout layer that never drops anything.
    pub fn disabled() -> Self {
        Self {
            probability: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    /// Builds a layer from an optional probability; `None` disables dropout.
    pub fn from_probability(probability: Option<f32>, seed: u64) -> Result<Self> {
        match probability {
            Some(p) => Self::new(p, seed),
            None => Ok(Self::disabled()),
        }
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    /// Whether a forward pass right now would alter its input.
    pub fn is_active(&self) -> bool {
        self.probability > 0.0 && mode::is_training()
    }

    /// Applies dropout when training, otherwise returns `input` unchanged.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        if !self.is_active() {
            return Ok(input.clone());
        }

        let keep_prob = 1.0 - self.probability;
        let keep = Bernoulli::new(keep_prob as f64)
            .map_err(|err| LayerError::config(format!("invalid keep probability: {err}")))?;
        let mask_data = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| LayerError::config("dropout RNG mutex poisoned"))?;
            (&mut *rng)
                .sample_iter(keep)
                .take(input.elem_count())
                .map(|kept| if kept { 1.0f32 } else { 0.0f32 })
                .collect::<Vec<_>>()
        };

        let dtype = input.dtype();
        let mask = Tensor::from_vec(mask_data, input.dims(), input.device())?;
        let mask = if dtype == DType::F32 {
            mask
        } else {
            mask.to_dtype(dtype)?
        };
        let dropped = input.mul(&mask)?.affine(1.0 / keep_prob as f64, 0.0)?;
        Ok(dropped)
    }
}
