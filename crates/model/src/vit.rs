//! Vision Transformer classifier.
//!
//! Images `(B, H, W, C)` are cut into patches, embedded, prefixed with a
//! learned class token, encoded, and the class-token row is projected to
//! `num_classes` logits. The head kernel starts at zero, so a freshly
//! initialized model produces all-zero logits.

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use embedding::{PatchEmbed, PatchEmbedConfig, PatchEmbedParams};
use layers::{
    init::{Fans, Initializer},
    Dense, DenseParams, ParameterSet, PrecisionPolicy,
};
use rand::Rng;

use crate::config::ViTConfig;
use crate::encoder::{Encoder, EncoderParams};
use crate::error::{ModelError, Result};

/// Full parameter tree of a [`ViT`].
#[derive(Debug, Clone)]
pub struct ViTParams {
    pub patch_embed: PatchEmbedParams,
    /// Class token `(1, 1, embed_dim)`.
    pub cls: Tensor,
    pub encoder: EncoderParams,
    pub head: DenseParams,
}

#[derive(Debug, Clone)]
pub struct ViT {
    config: ViTConfig,
    patch_embed: PatchEmbed,
    encoder: Encoder,
    head: Dense,
    policy: PrecisionPolicy,
}

impl ViT {
    pub fn new(config: ViTConfig) -> Result<Self> {
        config.validate()?;
        let encoder_config = &config.encoder;
        let dtype = encoder_config.precision.dtype();
        let patch_embed = PatchEmbed::new(PatchEmbedConfig {
            dtype,
            kernel_init: encoder_config.kernel_init,
            bias_init: encoder_config.bias_init,
            ..PatchEmbedConfig::new(config.patch_shape, config.embed_dim)
        })?;
        let encoder = Encoder::new(encoder_config)?;
        let head = Dense::new(config.num_classes, true)?
            .with_kernel_init(Initializer::Zeros)
            .with_bias_init(encoder_config.bias_init);
        Ok(Self {
            patch_embed,
            encoder,
            head,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
            config,
        })
    }

    pub fn config(&self) -> &ViTConfig {
        &self.config
    }

    /// Storage dtype of every parameter.
    pub fn dtype(&self) -> DType {
        self.config.encoder.precision.dtype()
    }

    /// Creates every parameter for images shaped `(batch, height, width, channels)`.
    pub fn init(&self, image_shape: &[usize], vb: VarBuilder<'_>) -> Result<ViTParams> {
        let (batch, height, width) = match image_shape {
            [b, h, w, _] => (*b, *h, *w),
            other => {
                return Err(ModelError::shape(
                    "vit.init",
                    format!("expected [batch, height, width, channels], got {other:?}"),
                ))
            }
        };
        let embed_dim = self.config.embed_dim;
        let (rows, cols) = self.patch_embed.grid(height, width)?;

        let patch_embed = self
            .patch_embed
            .init(image_shape, vb.pp("PatchEmbedBlock_0"))?;
        let cls = Initializer::Zeros.create(
            &vb,
            (1, 1, embed_dim),
            "cls",
            Fans::vector(embed_dim),
        )?;
        let tokens = 1 + rows * cols;
        let encoder = self
            .encoder
            .init(&[batch, tokens, embed_dim], vb.pp("Encoder_0"))?;
        let head = self.head.init(embed_dim, vb.pp("Dense_0"))?;
        Ok(ViTParams {
            patch_embed,
            cls,
            encoder,
            head,
        })
    }

    /// Runs the initialization phase against a fresh parameter registry.
    pub fn initialize(
        &self,
        image_shape: &[usize],
        device: &Device,
    ) -> Result<ParameterSet<ViTParams>> {
        let set = ParameterSet::initialize(self.dtype(), device, |vb| self.init(image_shape, vb))?;
        log::info!(
            "vit initialized image={image_shape:?} patch={:?} embed_dim={} layers={} heads={} classes={} parameters={}",
            self.config.patch_shape,
            self.config.embed_dim,
            self.config.encoder.num_layers,
            self.config.encoder.num_heads,
            self.config.num_classes,
            set.num_parameters()?
        );
        Ok(set)
    }

    /// `(B, H, W, C)` images → `(B, num_classes)` logits.
    pub fn forward<R>(
        &self,
        params: &ViTParams,
        images: &Tensor,
        is_training: bool,
        rng: &mut R,
    ) -> Result<Tensor>
    where
        R: Rng + ?Sized,
    {
        log::trace!(
            "vit forward images={:?} training={is_training}",
            images.dims()
        );
        let x = self.patch_embed.forward(&params.patch_embed, images)?;
        let (batch, _, embed_dim) = x.dims3()?;
        let cls = params
            .cls
            .to_dtype(x.dtype())?
            .broadcast_as((batch, 1, embed_dim))?
            .contiguous()?;
        let x = Tensor::cat(&[&cls, &x], 1)?;

        let x = self
            .encoder
            .forward(&params.encoder, &x, is_training, rng)?;
        let cls_token = x.i((.., 0))?.contiguous()?;
        Ok(self.head.forward(&params.head, &cls_token, &self.policy)?)
    }
}
