//! Layer normalisation over the trailing feature axis.
//!
//! Statistics are promoted to [`PrecisionPolicy::reduction`] before the mean
//! and variance are taken; the affine `scale`/`bias` are applied in the compute
//! dtype and the result is cast back to storage.

use candle_core::{Tensor, D};
use candle_nn::VarBuilder;

use crate::{
    checks,
    dtypes::PrecisionPolicy,
    error::Result,
    init::{Fans, Initializer},
};

/// Default stabiliser added to the variance.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Learnable affine parameters of a [`LayerNorm`].
#[derive(Debug, Clone)]
pub struct LayerNormParams {
    pub scale: Tensor,
    pub bias: Tensor,
}

/// Standard LayerNorm with learnable `scale` (ones) and `bias` (zeros).
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNorm {
    epsilon: f64,
}

impl LayerNorm {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn init(&self, features: usize, vb: VarBuilder<'_>) -> Result<LayerNormParams> {
        checks::expect_positive("layer_norm.features", features)?;
        let fans = Fans::vector(features);
        let scale = Initializer::Ones.create(&vb, features, "scale", fans)?;
        let bias = Initializer::Zeros.create(&vb, features, "bias", fans)?;
        Ok(LayerNormParams { scale, bias })
    }

    pub fn forward(
        &self,
        params: &LayerNormParams,
        hidden: &Tensor,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        let features = params.scale.dims()[0];
        checks::expect_min_rank("layer_norm.input", hidden, 1)?;
        checks::expect_last_dim("layer_norm.input", hidden, features)?;

        let compute = policy.cast_for_reduction(hidden)?;
        let mean = compute.mean_keepdim(D::Minus1)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let denom = (variance + self.epsilon)?.sqrt()?;
        let normalized = policy.cast_for_matmul(&centered.broadcast_div(&denom)?)?;

        let scale = params.scale.to_dtype(normalized.dtype())?;
        let bias = params.bias.to_dtype(normalized.dtype())?;
        let output = normalized.broadcast_mul(&scale)?.broadcast_add(&bias)?;
        Ok(policy.cast_to_storage(&output)?)
    }
}

impl Default for LayerNorm {
    fn default() -> Self {
        Self::new(DEFAULT_EPSILON)
    }
}
