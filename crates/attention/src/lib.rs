//! Multi-head scaled dot-product attention for the vision transformer.
//!
//! Layers take `(batch, sequence, channels)` inputs, split channels into
//! `num_heads` heads of width `head_ch`, and compute per head
//! `softmax(q k^T / sqrt(head_ch)) v` before merging heads back into `out_ch`
//! channels. With talking heads enabled, learned `(num_heads, num_heads)`
//! matrices mix the scores across heads before the softmax and the weights
//! after it.
//!
//! Dropout is a train-only concern. Every forward pass receives the training
//! flag and the caller's random number generator; evaluation passes never
//! consume randomness and are deterministic.

pub mod block;
pub mod core;
pub mod reference;

pub use block::{AttentionBlock, AttentionParams, SelfAttentionBlock, SelfAttentionParams};
pub use crate::core::{Attention, AttentionConfig, AttentionError, HeadLayout, HeadMixing};
pub use reference::ExactAttention;
