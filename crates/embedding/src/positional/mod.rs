//! Positional information for token sequences.

pub mod absolute;

pub use absolute::{AddAbsolutePositionalEmbedding, PositionalParams, POS_EMBED_STDDEV};
