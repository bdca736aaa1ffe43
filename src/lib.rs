//! Vision Transformer image classifier built on candle.
//!
//! The workspace is split by concern and re-exported here:
//!
//! * [`layers`]: projections, LayerNorm, dropout, feed-forward, initializers
//!   and the [`ParameterSet`] that owns every parameter;
//! * [`attention`]: multi-head scaled dot-product attention with optional
//!   talking heads;
//! * [`embedding`]: patch and absolute positional embeddings;
//! * [`model`]: encoder blocks, the encoder stack and the [`ViT`] classifier.
//!
//! ```no_run
//! use candle_core::{Device, Tensor};
//! use rand::{rngs::StdRng, SeedableRng};
//! use vision_transformer::{ViT, ViTConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vit = ViT::new(ViTConfig::new(10, 2, 8, 64, (16, 16)))?;
//! let params = vit.initialize(&[4, 32, 32, 3], &Device::Cpu)?;
//! let images = Tensor::zeros((4, 32, 32, 3), candle_core::DType::F32, &Device::Cpu)?;
//! let logits = vit.forward(params.params(), &images, false, &mut StdRng::seed_from_u64(0))?;
//! assert_eq!(logits.dims(), &[4, 10]);
//! # Ok(())
//! # }
//! ```

pub use attention;
pub use embedding;
pub use layers;
pub use model;

pub use attention::{
    AttentionBlock, AttentionConfig, AttentionError, AttentionParams, SelfAttentionBlock,
    SelfAttentionParams,
};
pub use embedding::{AddAbsolutePositionalEmbedding, PatchEmbed, PatchEmbedConfig};
pub use layers::{
    ActivationKind, Dropout, FeedForward, FeedForwardConfig, Initializer, LayerError,
    ParameterSet, Precision,
};
pub use model::{
    Encoder, EncoderBlock, EncoderConfig, EncoderParams, ModelError, ViT, ViTConfig, ViTParams,
};
