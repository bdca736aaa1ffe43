//! Portable, exact attention kernels.
//!
//! These paths favour clarity over absolute performance and serve as the
//! baseline every attention layer in the workspace runs on.

pub mod exact;

pub use exact::{mix_heads, ExactAttention};
