//! Activation catalogue for the feed-forward sublayer.
//!
//! Activations are element-wise and shape preserving. Inputs are promoted to
//! [`PrecisionPolicy::compute`] before evaluation and cast back to storage.
//!
//! * **GELU** uses the tanh approximation
//!   `0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 x^3)))`.
//! * **GELU (erf)** uses `0.5 * x * (1 + erf(x / sqrt(2)))`.
//! * **SiLU** computes `x * sigmoid(x)`.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::{dtypes::PrecisionPolicy, error::Result};

/// Identifies which non-linearity the feed-forward block applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    /// Identity function, useful for debugging.
    Identity,
    /// Smooth gating GELU, tanh approximation.
    #[default]
    Gelu,
    /// Exact erf-based GELU.
    GeluErf,
    Silu,
    Relu,
}

impl ActivationKind {
    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let compute = policy.cast_for_matmul(input)?;
        let output = match self {
            ActivationKind::Identity => compute,
            ActivationKind::Gelu => compute.gelu()?,
            ActivationKind::GeluErf => compute.gelu_erf()?,
            ActivationKind::Silu => compute.silu()?,
            ActivationKind::Relu => compute.relu()?,
        };
        Ok(policy.cast_to_storage(&output)?)
    }
}
