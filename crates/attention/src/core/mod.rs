//! Core traits and types shared across attention implementations.
//!
//! Kernels operate on per-head tensors with layout
//! `[batch, num_heads, seq_len, head_ch]`. Queries and keys/values may have
//! different sequence lengths; the output follows the query length.

pub mod config;
pub mod errors;

use candle_core::Tensor;
use rand::Rng;

pub use config::{AttentionConfig, HeadLayout};
pub use errors::AttentionError;

/// Learned `(num_heads, num_heads)` matrices mixing scores across heads.
///
/// Both matrices are applied as `out[j] = sum_i in[i] * m[i, j]` along the
/// head axis, `pre_softmax` on the raw scores and `post_softmax` on the
/// normalized weights.
#[derive(Debug, Clone)]
pub struct HeadMixing {
    pub pre_softmax: Tensor,
    pub post_softmax: Tensor,
}

/// Unified interface for attention kernels.
///
/// * `q` is `[batch, heads, q_len, head_ch]`; `k` and `v` are
///   `[batch, heads, k_len, head_ch]`.
/// * The returned tensor has the shape of `q`.
/// * Implementations scale queries by `1 / sqrt(head_ch)` exactly once.
/// * Weight dropout only runs when `is_training` is set, drawing from `rng`.
pub trait Attention {
    fn attend<R>(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mixing: Option<&HeadMixing>,
        is_training: bool,
        rng: &mut R,
    ) -> Result<Tensor, AttentionError>
    where
        R: Rng + ?Sized;
}
