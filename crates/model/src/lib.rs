//! Vision Transformer assembly.
//!
//! [`ViT`] composes patch embedding, a class token, the [`Encoder`] stack and
//! a linear head. Every module follows the two-phase lifecycle of the
//! `layers` crate: `init` derives and creates parameters from a sample input
//! shape, `forward` is a pure function of those parameters.

pub mod block;
pub mod config;
pub mod encoder;
pub mod error;
pub mod vit;

pub use block::{EncoderBlock, EncoderBlockParams};
pub use config::{EncoderConfig, ViTConfig};
pub use encoder::{Encoder, EncoderParams};
pub use error::{ModelError, Result};
pub use vit::{ViT, ViTParams};
