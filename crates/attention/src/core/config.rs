//! Configuration options shared by all attention implementations.
//!
//! The [`Config`] struct captures run-time knobs that callers can tune without
//! swapping implementations. Two environment variables override the values
//! built in code:
//!
//! * `ATTENTION_DROPOUT`: a probability in `[0, 1)`, or `none` to disable.
//! * `ATTENTION_MASK_FILL`: the finite score written into blocked positions,
//!   at most [`MAX_MASK_FILL`].

use super::AttentionError;

const ENV_DROPOUT: &str = "ATTENTION_DROPOUT";
const ENV_MASK_FILL: &str = "ATTENTION_MASK_FILL";

/// Largest accepted fill; anything higher leaves visible weight on blocked keys.
pub const MAX_MASK_FILL: f32 = -1e4;

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Probability for dropout applied to attention weights during training.
    ///
    /// When `None`, the layer building the kernel keeps its own setting.
    pub dropout_p: Option<f32>,
    /// Score assigned to blocked positions before the softmax.
    pub mask_fill: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dropout_p: None,
            mask_fill: -1e9,
        }
    }
}

impl Config {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, AttentionError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `ATTENTION_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), AttentionError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides resolved through `lookup`, then validates the result.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), AttentionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_DROPOUT) {
            let raw = raw.trim();
            self.dropout_p = if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(raw.parse::<f32>().map_err(|err| {
                    AttentionError::InvalidConfig(format!("{ENV_DROPOUT}={raw}: {err}"))
                })?)
            };
            log::debug!("attention dropout overridden to {:?}", self.dropout_p);
        }
        if let Some(raw) = lookup(ENV_MASK_FILL) {
            let raw = raw.trim();
            self.mask_fill = raw.parse::<f32>().map_err(|err| {
                AttentionError::InvalidConfig(format!("{ENV_MASK_FILL}={raw}: {err}"))
            })?;
            log::debug!("attention mask fill overridden to {}", self.mask_fill);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        if let Some(p) = self.dropout_p {
            if !(0.0..1.0).contains(&p) {
                return Err(AttentionError::InvalidConfig(format!(
                    "dropout probability must be in [0, 1), got {p}"
                )));
            }
        }
        if !self.mask_fill.is_finite() || self.mask_fill > MAX_MASK_FILL {
            return Err(AttentionError::InvalidConfig(format!(
                "mask fill must be finite and at most {MAX_MASK_FILL}, got {}",
                self.mask_fill
            )));
        }
        Ok(())
    }
}
