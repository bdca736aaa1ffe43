//! Non-overlapping patch embedding for channels-last images.
//!
//! A strided convolution with kernel = stride = `patch_shape` is evaluated as
//! patch extraction followed by one matmul. The kernel keeps the channels-last
//! convolution layout `(ph, pw, C, E)` so weights exchanged with other
//! implementations need no transposition.

use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use layers::{
    checks,
    init::{Fans, Initializer},
    LayerError, PrecisionPolicy, Result,
};

/// Configuration of a [`PatchEmbed`] layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchEmbedConfig {
    /// Patch `(height, width)`; also the convolution stride.
    pub patch_shape: (usize, usize),
    pub embed_dim: usize,
    pub use_bias: bool,
    pub dtype: DType,
    pub kernel_init: Initializer,
    pub bias_init: Initializer,
}

impl PatchEmbedConfig {
    pub fn new(patch_shape: (usize, usize), embed_dim: usize) -> Self {
        Self {
            patch_shape,
            embed_dim,
            use_bias: true,
            dtype: DType::F32,
            kernel_init: Initializer::default(),
            bias_init: Initializer::Zeros,
        }
    }
}

/// Parameters of the `Conv_0` patch projection.
#[derive(Debug, Clone)]
pub struct PatchEmbedParams {
    pub kernel: Tensor,
    pub bias: Option<Tensor>,
}

#[derive(Debug, Clone)]
pub struct PatchEmbed {
    config: PatchEmbedConfig,
    policy: PrecisionPolicy,
}

impl PatchEmbed {
    pub fn new(config: PatchEmbedConfig) -> Result<Self> {
        checks::expect_positive("patch_shape.0", config.patch_shape.0)?;
        checks::expect_positive("patch_shape.1", config.patch_shape.1)?;
        checks::expect_positive("embed_dim", config.embed_dim)?;
        let policy = PrecisionPolicy::from_parameter_dtype(config.dtype);
        Ok(Self { config, policy })
    }

    pub fn config(&self) -> &PatchEmbedConfig {
        &self.config
    }

    /// Patch grid `(rows, cols)` for an image of `height` × `width` pixels.
    pub fn grid(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        let (ph, pw) = self.config.patch_shape;
        if height % ph != 0 || width % pw != 0 || height == 0 || width == 0 {
            return Err(LayerError::Shape {
                context: "patch_embed.image",
                message: format!(
                    "image {height}x{width} is not divisible into {ph}x{pw} patches"
                ),
            });
        }
        Ok((height / ph, width / pw))
    }

    /// Creates `Conv_0.kernel` `(ph, pw, C, E)` and `Conv_0.bias` `(E,)`.
    pub fn init(&self, image_shape: &[usize], vb: VarBuilder<'_>) -> Result<PatchEmbedParams> {
        let (height, width, channels) = match image_shape {
            [_, h, w, c] => (*h, *w, *c),
            other => {
                return Err(LayerError::Shape {
                    context: "patch_embed.init",
                    message: format!("expected image shape [batch, height, width, channels], got {other:?}"),
                })
            }
        };
        checks::expect_positive("patch_embed.channels", channels)?;
        self.grid(height, width)?;

        let (ph, pw) = self.config.patch_shape;
        let embed_dim = self.config.embed_dim;
        let vb = vb.pp("Conv_0");
        let receptive = ph * pw;
        let kernel = self.config.kernel_init.create(
            &vb,
            (ph, pw, channels, embed_dim),
            "kernel",
            Fans::new(receptive * channels, receptive * embed_dim),
        )?;
        let bias = if self.config.use_bias {
            Some(
                self.config
                    .bias_init
                    .create(&vb, embed_dim, "bias", Fans::vector(embed_dim))?,
            )
        } else {
            None
        };
        Ok(PatchEmbedParams { kernel, bias })
    }

    /// `(B, H, W, C)` → `(B, (H/ph)·(W/pw), E)`, patches in row-major order.
    pub fn forward(&self, params: &PatchEmbedParams, images: &Tensor) -> Result<Tensor> {
        checks::expect_rank("patch_embed.image", images, 4)?;
        let (batch, height, width, channels) = images.dims4()?;
        let (rows, cols) = self.grid(height, width)?;
        let (ph, pw) = self.config.patch_shape;
        let embed_dim = self.config.embed_dim;
        checks::expect_shape(
            "patch_embed.kernel",
            &params.kernel,
            &[ph, pw, channels, embed_dim],
        )?;

        let patch_len = ph * pw * channels;
        let patches = self
            .policy
            .cast_for_matmul(images)?
            .reshape(vec![batch, rows, ph, cols, pw, channels])?
            .permute(vec![0, 1, 3, 2, 4, 5])?
            .contiguous()?
            .reshape((batch * rows * cols, patch_len))?;
        let kernel = self
            .policy
            .cast_for_matmul(&params.kernel)?
            .reshape((patch_len, embed_dim))?;
        let mut embedded = patches.matmul(&kernel)?;
        if let Some(bias) = &params.bias {
            embedded = embedded.broadcast_add(&self.policy.cast_for_matmul(bias)?)?;
        }
        let embedded = embedded.reshape((batch, rows * cols, embed_dim))?;
        Ok(self.policy.cast_to_storage(&embedded)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, IndexOp};
    use layers::ParameterSet;

    #[test]
    fn patches_follow_row_major_order() -> Result<()> {
        let device = Device::Cpu;
        let embed = PatchEmbed::new(PatchEmbedConfig::new((2, 2), 3))?;
        let set = ParameterSet::initialize(DType::F32, &device, |vb| {
            embed.init(&[1, 4, 6, 2], vb)
        })?;
        let images = Tensor::randn(0f32, 1.0, (1, 4, 6, 2), &device)?;
        let output = embed.forward(set.params(), &images)?;
        assert_eq!(output.dims(), &[1, 6, 3]);

        // Patch (row 1, col 2) covers pixels [2..4, 4..6].
        let patch = images
            .i((0, 2..4, 4..6, ..))?
            .contiguous()?
            .reshape((1, 8))?;
        let kernel = set.params().kernel.reshape((8, 3))?;
        let expected = patch.matmul(&kernel)?.reshape(3)?;
        let got = output.i((0, 5))?;
        let diff = got.sub(&expected)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }

    #[test]
    fn parameters_use_conv_layout() -> Result<()> {
        let device = Device::Cpu;
        let embed = PatchEmbed::new(PatchEmbedConfig::new((4, 2), 5))?;
        let set = ParameterSet::initialize(DType::F32, &device, |vb| {
            embed.init(&[2, 8, 8, 3], vb.pp("PatchEmbedBlock_0"))
        })?;
        let named = set.named_parameters()?;
        let shapes: Vec<(String, Vec<usize>)> = named
            .into_iter()
            .map(|(name, tensor)| (name, tensor.dims().to_vec()))
            .collect();
        assert_eq!(
            shapes,
            vec![
                ("PatchEmbedBlock_0.Conv_0.bias".to_string(), vec![5]),
                ("PatchEmbedBlock_0.Conv_0.kernel".to_string(), vec![4, 2, 3, 5]),
            ]
        );
        Ok(())
    }

    #[test]
    fn indivisible_images_are_shape_errors() -> Result<()> {
        let device = Device::Cpu;
        let embed = PatchEmbed::new(PatchEmbedConfig::new((4, 4), 8))?;
        let set = ParameterSet::initialize(DType::F32, &device, |vb| {
            embed.init(&[1, 8, 8, 3], vb)
        })?;
        let odd = Tensor::zeros((1, 8, 10, 3), DType::F32, &device)?;
        assert!(embed.forward(set.params(), &odd).unwrap_err().is_shape());
        let flat = Tensor::zeros((8, 8, 3), DType::F32, &device)?;
        assert!(embed.forward(set.params(), &flat).unwrap_err().is_shape());
        assert!(PatchEmbed::new(PatchEmbedConfig::new((0, 4), 8))
            .unwrap_err()
            .is_configuration());
        Ok(())
    }
}
