//! Residual merge used by pre-norm blocks.
//!
//! The residual path always carries the *un-normalised* input; the branch is
//! whatever the normalised sublayer produced. Both operands are promoted to
//! [`PrecisionPolicy::compute`] before the add and cast back afterwards.

use candle_core::Tensor;

use crate::{checks, dtypes::PrecisionPolicy, error::Result};

/// Returns `residual + branch` after checking both share a shape.
pub fn residual_add(
    context: &'static str,
    branch: &Tensor,
    residual: &Tensor,
    policy: &PrecisionPolicy,
) -> Result<Tensor> {
    checks::expect_same_shape(context, branch, residual)?;
    let branch = policy.cast_for_matmul(branch)?;
    let residual = policy.cast_for_matmul(residual)?;
    let added = residual.add(&branch)?;
    Ok(policy.cast_to_storage(&added)?)
}
