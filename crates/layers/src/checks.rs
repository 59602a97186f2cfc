//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. Each takes a static label naming the
//! tensor so the resulting [`LayerError::Shape`] points at the offending input.

use candle_core::{DType, Tensor};

use crate::error::{LayerError, Result};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &'static str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(LayerError::shape(
            label,
            format!("expected shape {:?}, got {:?}", expected, actual),
        ))
    }
}

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(label: &'static str, tensor: &Tensor, rank: usize) -> Result<()> {
    let dims = tensor.dims();
    if dims.len() == rank {
        Ok(())
    } else {
        Err(LayerError::shape(
            label,
            format!("expected rank {}, got {:?}", rank, dims),
        ))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(label: &'static str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual_hidden] if *actual_hidden == hidden => Ok(()),
        dims => Err(LayerError::shape(
            label,
            format!("expected (batch, seq, {}) layout, got {:?}", hidden, dims),
        )),
    }
}

/// Validates a `(..., hidden)` tensor of any non-zero rank.
pub fn expect_last_dim(label: &'static str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(actual) if *actual == hidden => Ok(()),
        _ => Err(LayerError::shape(
            label,
            format!("expected (..., {}) layout, got {:?}", hidden, tensor.dims()),
        )),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &'static str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(LayerError::shape(
            label,
            format!("expected dtype in {:?}, got {:?}", allowed, dtype),
        ))
    }
}

/// Checks two tensors share a dtype.
pub fn expect_same_dtype(
    label: &'static str,
    tensor: &Tensor,
    other_label: &str,
    other: &Tensor,
) -> Result<()> {
    if tensor.dtype() == other.dtype() {
        Ok(())
    } else {
        Err(LayerError::shape(
            label,
            format!(
                "dtype {:?} does not match {} dtype {:?}",
                tensor.dtype(),
                other_label,
                other.dtype()
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn last_dim_accepts_any_leading_rank() -> Result<()> {
        let device = Device::Cpu;
        for dims in [vec![4], vec![3, 4], vec![2, 3, 4], vec![2, 2, 3, 4]] {
            let tensor = Tensor::zeros(dims, DType::F32, &device)?;
            expect_last_dim("x", &tensor, 4)?;
        }
        let wrong = Tensor::zeros((2, 5), DType::F32, &device)?;
        assert!(matches!(
            expect_last_dim("x", &wrong, 4),
            Err(LayerError::Shape { .. })
        ));
        let scalar = Tensor::new(1f32, &device)?;
        assert!(expect_last_dim("x", &scalar, 1).is_err());
        Ok(())
    }

    #[test]
    fn batch_seq_hidden_rejects_wrong_width() -> Result<()> {
        let tensor = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu)?;
        expect_batch_seq_hidden("probe", &tensor, 4)?;
        let err = expect_batch_seq_hidden("probe", &tensor, 5).unwrap_err();
        assert!(matches!(err, LayerError::Shape { context: "probe", .. }));
        Ok(())
    }

    #[test]
    fn rank_and_dtype_checks_report_label() -> Result<()> {
        let tensor = Tensor::zeros((2, 3), DType::F16, &Device::Cpu)?;
        assert!(expect_rank("probe", &tensor, 2).is_ok());
        let err = expect_dtype_in("probe", &tensor, &[DType::F32]).unwrap_err();
        assert!(err.to_string().contains("probe"));
        Ok(())
    }
}
