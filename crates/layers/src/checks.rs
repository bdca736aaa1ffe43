//! Lightweight validation helpers shared across layer components.
//!
//! Shape helpers return [`LayerError::Shape`] and hyperparameter helpers return
//! [`LayerError::Configuration`], so call sites can propagate with `?` instead
//! of panicking.

use candle_core::Tensor;

use crate::error::{LayerError, Result};

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(context: &'static str, tensor: &Tensor, rank: usize) -> Result<()> {
    let dims = tensor.dims();
    if dims.len() == rank {
        Ok(())
    } else {
        Err(LayerError::shape(
            context,
            format!("expected rank {rank}, got shape {dims:?}"),
        ))
    }
}

/// Ensures a tensor has at least `rank` dimensions.
pub fn expect_min_rank(context: &'static str, tensor: &Tensor, rank: usize) -> Result<()> {
    let dims = tensor.dims();
    if dims.len() >= rank {
        Ok(())
    } else {
        Err(LayerError::shape(
            context,
            format!("expected rank >= {rank}, got shape {dims:?}"),
        ))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &'static str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(LayerError::shape(
            context,
            format!("expected shape {expected:?}, got {actual:?}"),
        ))
    }
}

/// Validates the trailing feature axis.
pub fn expect_last_dim(context: &'static str, tensor: &Tensor, features: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(&last) if last == features => Ok(()),
        _ => Err(LayerError::shape(
            context,
            format!(
                "expected trailing dimension {features}, got shape {:?}",
                tensor.dims()
            ),
        )),
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &'static str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual] if *actual == hidden => Ok(()),
        dims => Err(LayerError::shape(
            context,
            format!("expected (batch, seq, {hidden}) layout, got {dims:?}"),
        )),
    }
}

/// Checks two tensors share the same shape.
pub fn expect_same_shape(context: &'static str, lhs: &Tensor, rhs: &Tensor) -> Result<()> {
    if lhs.dims() == rhs.dims() {
        Ok(())
    } else {
        Err(LayerError::shape(
            context,
            format!("shape mismatch {:?} vs {:?}", lhs.dims(), rhs.dims()),
        ))
    }
}

/// Rejects zero-sized hyperparameters.
pub fn expect_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        Err(LayerError::Configuration(format!(
            "{name} must be greater than zero"
        )))
    } else {
        Ok(())
    }
}

/// Requires `value` to split evenly into `parts`.
pub fn expect_divisible(name: &str, value: usize, parts_name: &str, parts: usize) -> Result<()> {
    expect_positive(parts_name, parts)?;
    if value % parts == 0 {
        Ok(())
    } else {
        Err(LayerError::Configuration(format!(
            "{name} ({value}) must be divisible by {parts_name} ({parts})"
        )))
    }
}

/// Dropout probabilities live in the closed unit interval.
pub fn expect_rate(name: &str, rate: f32) -> Result<()> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(LayerError::Configuration(format!(
            "{name} must be in [0, 1], got {rate}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn rank_and_shape_failures_are_shape_errors() -> candle_core::Result<()> {
        let tensor = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        assert!(expect_rank("test", &tensor, 3).unwrap_err().is_shape());
        assert!(expect_shape("test", &tensor, &[3, 2]).unwrap_err().is_shape());
        assert!(expect_last_dim("test", &tensor, 3).is_ok());
        assert!(expect_batch_seq_hidden("test", &tensor, 3).is_err());
        Ok(())
    }

    #[test]
    fn hyperparameter_failures_are_configuration_errors() {
        assert!(expect_divisible("in_ch", 10, "num_heads", 3)
            .unwrap_err()
            .is_configuration());
        assert!(expect_divisible("in_ch", 8, "num_heads", 0)
            .unwrap_err()
            .is_configuration());
        assert!(expect_rate("rate", 1.5).unwrap_err().is_configuration());
        assert!(expect_rate("rate", -0.1).is_err());
        assert!(expect_rate("rate", 1.0).is_ok());
        assert!(expect_rate("rate", 0.0).is_ok());
    }
}
