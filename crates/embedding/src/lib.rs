//! Embedding layers for the vision transformer.
//!
//! [`patch::PatchEmbed`] turns channels-last images into patch token
//! sequences, and [`positional::AddAbsolutePositionalEmbedding`] adds a learned
//! per-position table to a token sequence.

pub mod patch;
pub mod positional;

pub use patch::{PatchEmbed, PatchEmbedConfig, PatchEmbedParams};
pub use positional::{AddAbsolutePositionalEmbedding, PositionalParams};
