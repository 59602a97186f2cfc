//! Activation catalogue for position-wise feed-forward stacks.
//!
//! Each activation promotes its input to the compute dtype requested by
//! [`PrecisionPolicy`] before evaluating the non-linearity, then casts the
//! result back to the storage dtype.
//!
//! * **ReLU** `max(0, x)`, the encoder default.
//! * **GELU** uses the erf formulation `0.5 * x * (1 + erf(x / sqrt(2)))`.
//! * **SiLU / Swish** computes `x * sigmoid(x)`.

use candle_core::Tensor;

use crate::{dtypes::PrecisionPolicy, error::Result};

/// Identifies which non-linearity a feed-forward layer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationKind {
    /// Identity function, useful for debugging or wiring custom stacks.
    Identity,
    /// Rectified linear unit.
    #[default]
    Relu,
    /// GeLU in its exact erf form.
    Gelu,
    /// Standard SiLU (a.k.a. swish) activation.
    Silu,
}

impl ActivationKind {
    /// Applies the activation to `input` using the precision rules in `policy`.
    pub fn apply(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let output = match self {
            ActivationKind::Identity => return Ok(policy.cast_to_storage(input)?),
            ActivationKind::Relu => policy.cast_for_matmul(input)?.relu()?,
            ActivationKind::Gelu => policy.cast_for_matmul(input)?.gelu_erf()?,
            ActivationKind::Silu => policy.cast_for_matmul(input)?.silu()?,
        };
        Ok(policy.cast_to_storage(&output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::f64::consts::SQRT_2;

    fn values(tensor: &Tensor) -> Result<Vec<f32>> {
        Ok(tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
    }

    #[test]
    fn relu_zeroes_negative_values() -> Result<()> {
        let input = Tensor::from_slice(&[-2.0f32, -0.5, 0.0, 1.5], (4,), &Device::Cpu)?;
        let output = ActivationKind::Relu.apply(&input, &PrecisionPolicy::default())?;
        assert_eq!(values(&output)?, vec![0.0, 0.0, 0.0, 1.5]);
        Ok(())
    }

    #[test]
    fn gelu_matches_reference_formula() -> Result<()> {
        let input = Tensor::from_slice(&[-2.5f32, -0.5, 0.0, 1.0, 3.0], (5,), &Device::Cpu)?;
        let output = ActivationKind::Gelu.apply(&input, &PrecisionPolicy::default())?;

        let expected = values(&input)?
            .into_iter()
            .map(|x| {
                let x = f64::from(x);
                (0.5 * x * (1.0 + erf(x / SQRT_2))) as f32
            })
            .collect::<Vec<_>>();
        for (got, want) in values(&output)?.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-4, "{got} vs {want}");
        }
        Ok(())
    }

    #[test]
    fn silu_matches_swish_reference() -> Result<()> {
        let input = Tensor::from_slice(&[-3.0f32, -1.0, 0.0, 0.5, 2.0], (5,), &Device::Cpu)?;
        let output = ActivationKind::Silu.apply(&input, &PrecisionPolicy::default())?;
        for (got, x) in values(&output)?.iter().zip(values(&input)?.iter()) {
            let want = x / (1.0 + (-x).exp());
            assert!((got - want).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn reduced_precision_output_keeps_storage_dtype() -> Result<()> {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        let input = Tensor::from_slice(&[-1.0f32, 2.0], (2,), &Device::Cpu)?.to_dtype(DType::F16)?;
        let output = ActivationKind::Relu.apply(&input, &policy)?;
        assert_eq!(output.dtype(), DType::F16);
        Ok(())
    }

    // Abramowitz and Stegun 7.1.26, accurate to ~1.5e-7.
    fn erf(x: f64) -> f64 {
        let sign = x.signum();
        let x = x.abs();
        let t = 1.0 / (1.0 + 0.3275911 * x);
        let poly = t
            * (0.254829592
                + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
        sign * (1.0 - poly * (-x * x).exp())
    }
}
