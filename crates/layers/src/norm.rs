//! Layer normalisation with a scalar learnable affine rescale.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Statistics are taken
//! independently per position over the last axis only, promoted to
//! [`PrecisionPolicy::reduction`] and cast back to the storage dtype
//! afterwards. The output is
//!
//! ```text
//! scale * (x - mean) / (std + epsilon) + bias
//! ```
//!
//! where `scale` and `bias` are single learnable scalars shared by every
//! position and feature, and `epsilon` is added to the standard deviation.

use candle_core::{DType, Device, Tensor, Var, D};

use crate::{
    checks,
    dtypes::PrecisionPolicy,
    error::{LayerError, Result},
};

/// Configuration for [`LayerNorm`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Added to the standard deviation before dividing.
    pub epsilon: f64,
    /// Use the `N - 1` (Bessel-corrected) standard deviation estimator.
    pub unbiased: bool,
}

impl NormConfig {
    /// Creates a configuration with `epsilon = 1e-6` and the unbiased estimator.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-6,
            unbiased: true,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(LayerError::config("norm hidden_size must be non-zero"));
        }
        if self.unbiased && self.hidden_size < 2 {
            return Err(LayerError::config(
                "unbiased standard deviation needs hidden_size >= 2",
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(LayerError::config(format!(
                "norm epsilon must be a positive finite number, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Per-position layer normalisation with scalar scale and bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    scale: Var,
    bias: Var,
}

impl LayerNorm {
    /// Constructs a norm with `scale = 1` and `bias = 0`.
    pub fn new(config: NormConfig, dtype: DType, device: &Device) -> Result<Self> {
        config.validate()?;
        let scale = Var::ones(1, dtype, device)?;
        let bias = Var::zeros(1, dtype, device)?;
        Ok(Self {
            config,
            scale,
            bias,
        })
    }

    /// Constructs a norm from explicit single-element parameter tensors.
    pub fn from_parameters(config: NormConfig, scale: Tensor, bias: Tensor) -> Result<Self> {
        config.validate()?;
        checks::expect_shape("norm.scale", &scale, &[1])?;
        checks::expect_shape("norm.bias", &bias, &[1])?;
        checks::expect_same_dtype("norm.bias", &bias, "norm.scale", &scale)?;
        Ok(Self {
            config,
            scale: Var::from_tensor(&scale)?,
            bias: Var::from_tensor(&bias)?,
        })
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn scale(&self) -> &Tensor {
        self.scale.as_tensor()
    }

    pub fn bias(&self) -> &Tensor {
        self.bias.as_tensor()
    }

    /// Trainable parameters named under `scope`.
    pub fn parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![
            (format!("{scope}.scale"), self.scale.clone()),
            (format!("{scope}.bias"), self.bias.clone()),
        ]
    }

    /// Normalises `hidden` along its last axis.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_last_dim("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let compute = policy.cast_for_reduction(hidden)?;

        let mean = compute.mean_keepdim(D::Minus1)?;
        let centered = compute.broadcast_sub(&mean)?;
        let dof = if self.config.unbiased {
            hidden_size - 1.0
        } else {
            hidden_size
        };
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / dof)?;
        let std = variance.sqrt()?;
        self.warn_on_degenerate(&std)?;

        let denom = (std + self.config.epsilon)?;
        let normalized = centered.broadcast_div(&denom)?;

        let scale = self.scale.as_tensor().to_dtype(normalized.dtype())?;
        let bias = self.bias.as_tensor().to_dtype(normalized.dtype())?;
        let output = normalized.broadcast_mul(&scale)?.broadcast_add(&bias)?;

        Ok(policy.cast_to_storage(&output)?)
    }

    fn warn_on_degenerate(&self, std: &Tensor) -> Result<()> {
        if !log::log_enabled!(log::Level::Warn) {
            return Ok(());
        }
        let degenerate = self.degenerate_positions(std)?;
        if degenerate > 0 {
            log::warn!(
                "layer norm: {degenerate} of {} positions have near-zero std; relying on epsilon={}",
                std.elem_count(),
                self.config.epsilon
            );
        }
        Ok(())
    }

    /// Counts positions whose std is within epsilon, reduced on the device.
    fn degenerate_positions(&self, std: &Tensor) -> Result<usize> {
        let count = std
            .le(self.config.epsilon)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn build_input(
        device: &Device,
        dtype: DType,
        batch: usize,
        seq: usize,
        hidden: usize,
    ) -> Result<Tensor> {
        let total = batch * seq * hidden;
        let data = (0..total)
            .map(|i| ((i * 7 % 11) as f32 * 0.25_f32) - 1.5_f32)
            .collect::<Vec<_>>();
        Ok(Tensor::from_vec(data, (batch, seq, hidden), device)?.to_dtype(dtype)?)
    }

    fn rows(tensor: &Tensor) -> Result<Vec<Vec<f32>>> {
        let (batch, seq, hidden) = tensor.dims3()?;
        Ok(tensor
            .to_dtype(DType::F32)?
            .reshape((batch * seq, hidden))?
            .to_vec2::<f32>()?)
    }

    fn reference_row(row: &[f32], epsilon: f64, unbiased: bool) -> Vec<f32> {
        let n = row.len() as f64;
        let mean = row.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
        let sq = row
            .iter()
            .map(|v| (f64::from(*v) - mean).powi(2))
            .sum::<f64>();
        let std = (sq / if unbiased { n - 1.0 } else { n }).sqrt();
        row.iter()
            .map(|v| ((f64::from(*v) - mean) / (std + epsilon)) as f32)
            .collect()
    }

    #[test]
    fn output_has_zero_mean_and_unit_std_per_position() -> Result<()> {
        let device = Device::Cpu;
        let norm = LayerNorm::new(NormConfig::new(8), DType::F32, &device)?;
        let input = Tensor::randn(3f32, 2.0, (2, 4, 8), &device)?;
        let output = norm.forward(&input, &PrecisionPolicy::default())?;
        assert_eq!(output.dims(), input.dims());

        for row in rows(&output)? {
            let n = row.len() as f32;
            let mean = row.iter().sum::<f32>() / n;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / (n - 1.0);
            assert!(mean.abs() < 1e-5, "mean {mean}");
            assert!((var.sqrt() - 1.0).abs() < 1e-3, "std {}", var.sqrt());
        }
        Ok(())
    }

    #[test]
    fn matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        for &dtype in &[DType::F32, DType::F16, DType::BF16] {
            let norm = LayerNorm::new(NormConfig::new(4), dtype, &device)?;
            let input = build_input(&device, dtype, 2, 3, 4)?;
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let output = norm.forward(&input, &policy)?;
            assert_eq!(output.dtype(), dtype);

            let tol = match dtype {
                DType::F16 => 5e-3,
                DType::BF16 => 3e-2,
                _ => 1e-5,
            };
            for (got, row) in rows(&output)?.iter().zip(rows(&input)?.iter()) {
                let want = reference_row(row, 1e-6, true);
                for (g, w) in got.iter().zip(want.iter()) {
                    assert!((g - w).abs() < tol, "{g} vs {w} for {dtype:?}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn population_estimator_is_selectable() -> Result<()> {
        let device = Device::Cpu;
        let mut config = NormConfig::new(6);
        config.unbiased = false;
        let norm = LayerNorm::new(config, DType::F32, &device)?;
        let input = build_input(&device, DType::F32, 1, 2, 6)?;
        let output = norm.forward(&input, &PrecisionPolicy::default())?;
        for (got, row) in rows(&output)?.iter().zip(rows(&input)?.iter()) {
            for (g, w) in got.iter().zip(reference_row(row, 1e-6, false).iter()) {
                assert!((g - w).abs() < 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn affine_scalars_apply_to_every_feature() -> Result<()> {
        let device = Device::Cpu;
        let scale = Tensor::new(&[2.0f32], &device)?;
        let bias = Tensor::new(&[0.5f32], &device)?;
        let norm = LayerNorm::from_parameters(NormConfig::new(4), scale, bias)?;
        let input = build_input(&device, DType::F32, 1, 3, 4)?;
        let output = norm.forward(&input, &PrecisionPolicy::default())?;
        for (got, row) in rows(&output)?.iter().zip(rows(&input)?.iter()) {
            for (g, w) in got.iter().zip(reference_row(row, 1e-6, true).iter()) {
                assert!((g - (2.0 * w + 0.5)).abs() < 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn constant_rows_stay_finite() -> Result<()> {
        let device = Device::Cpu;
        let norm = LayerNorm::new(NormConfig::new(5), DType::F32, &device)?;
        let input = Tensor::full(3.0f32, (2, 2, 5), &device)?;
        let output = norm.forward(&input, &PrecisionPolicy::default())?;
        let values = output.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.is_finite() && v.abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn normalises_any_leading_rank() -> Result<()> {
        let device = Device::Cpu;
        let norm = LayerNorm::new(NormConfig::new(4), DType::F32, &device)?;
        let policy = PrecisionPolicy::default();
        let input = build_input(&device, DType::F32, 2, 3, 4)?;
        let full = norm.forward(&input, &policy)?;

        let flat = norm.forward(&input.reshape((6, 4))?, &policy)?;
        assert_eq!(flat.dims(), &[6, 4]);
        let deep = norm.forward(&input.reshape((2, 3, 1, 4))?, &policy)?;
        assert_eq!(deep.dims(), &[2, 3, 1, 4]);

        let expected = full.flatten_all()?.to_vec1::<f32>()?;
        for output in [flat, deep] {
            let values = output.flatten_all()?.to_vec1::<f32>()?;
            for (got, want) in values.iter().zip(expected.iter()) {
                assert!((got - want).abs() < 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn degenerate_positions_are_counted_on_device() -> Result<()> {
        let device = Device::Cpu;
        let norm = LayerNorm::new(NormConfig::new(4), DType::F32, &device)?;
        // More rows than a u8 count can hold.
        let std = Tensor::cat(
            &[
                Tensor::zeros((300, 1), DType::F32, &device)?,
                Tensor::full(1e-7f32, (5, 1), &device)?,
                Tensor::ones((7, 1), DType::F32, &device)?,
            ],
            0,
        )?;
        assert_eq!(norm.degenerate_positions(&std)?, 305);
        assert_eq!(norm.degenerate_positions(&std.to_dtype(DType::BF16)?)?, 305);
        Ok(())
    }

    #[test]
    fn configured_epsilon_is_the_one_applied() -> Result<()> {
        let device = Device::Cpu;
        let mut config = NormConfig::new(2);
        config.epsilon = 1.0;
        let norm = LayerNorm::new(config, DType::F32, &device)?;
        // Row [1, 3]: mean 2, unbiased std sqrt(2).
        let input = Tensor::from_vec(vec![1.0f32, 3.0], (1, 1, 2), &device)?;
        let output = norm.forward(&input, &PrecisionPolicy::default())?;
        let values = output.flatten_all()?.to_vec1::<f32>()?;
        let expected = 1.0 / (2f32.sqrt() + 1.0);
        assert!((values[0] + expected).abs() < 1e-6);
        assert!((values[1] - expected).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn rejects_invalid_configuration_and_width() -> Result<()> {
        let device = Device::Cpu;
        assert!(LayerNorm::new(NormConfig::new(0), DType::F32, &device).is_err());
        assert!(LayerNorm::new(NormConfig::new(1), DType::F32, &device).is_err());
        let mut bad_eps = NormConfig::new(4);
        bad_eps.epsilon = 0.0;
        assert!(matches!(
            LayerNorm::new(bad_eps, DType::F32, &device),
            Err(LayerError::InvalidConfig(_))
        ));

        let norm = LayerNorm::new(NormConfig::new(4), DType::F32, &device)?;
        let input = Tensor::zeros((1, 2, 3), DType::F32, &device)?;
        assert!(matches!(
            norm.forward(&input, &PrecisionPolicy::default()),
            Err(LayerError::Shape { .. })
        ));
        Ok(())
    }

    #[test]
    fn parameters_are_scalars() {
        let norm = LayerNorm::new(NormConfig::new(4), DType::F32, &Device::Cpu).unwrap();
        let params = norm.parameters("norm");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].0, "norm.scale");
        assert!(params.iter().all(|(_, var)| var.as_tensor().dims() == [1]));
    }
}
