//! Transformer encoder: positional embedding, dropout, a stack of
//! [`EncoderBlock`]s and a final LayerNorm.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use embedding::{AddAbsolutePositionalEmbedding, PositionalParams};
use layers::{Dropout, LayerNorm, LayerNormParams, PrecisionPolicy};
use rand::Rng;

use crate::block::{EncoderBlock, EncoderBlockParams};
use crate::config::EncoderConfig;
use crate::error::{ModelError, Result};

/// Parameters of an [`Encoder`]; `blocks[i]` lives under `EncoderBlock_{i}`.
#[derive(Debug, Clone)]
pub struct EncoderParams {
    pub pos_embed: PositionalParams,
    pub blocks: Vec<EncoderBlockParams>,
    pub norm: LayerNormParams,
}

#[derive(Debug, Clone)]
pub struct Encoder {
    num_layers: usize,
    pos_embed: AddAbsolutePositionalEmbedding,
    dropout: Dropout,
    block: EncoderBlock,
    norm: LayerNorm,
    policy: PrecisionPolicy,
}

impl Encoder {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        config.validate()?;
        let dtype = config.precision.dtype();
        Ok(Self {
            num_layers: config.num_layers,
            pos_embed: AddAbsolutePositionalEmbedding::new(dtype),
            dropout: Dropout::new(config.dropout_rate)?,
            block: EncoderBlock::new(config)?,
            norm: LayerNorm::default(),
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        })
    }

    /// Creates every parameter for inputs shaped `(batch, seq_len, channels)`.
    pub fn init(&self, input_shape: &[usize], vb: VarBuilder<'_>) -> Result<EncoderParams> {
        let channels = match input_shape {
            [_, _, c] => *c,
            other => {
                return Err(ModelError::shape(
                    "encoder.init",
                    format!("expected [batch, seq_len, channels], got {other:?}"),
                ))
            }
        };
        let pos_embed = self.pos_embed.init(input_shape, vb.pp("AddAbsPosEmbed_0"))?;
        let blocks = (0..self.num_layers)
            .map(|i| {
                self.block
                    .init(input_shape, vb.pp(format!("EncoderBlock_{i}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let norm = self.norm.init(channels, vb.pp("LayerNorm_0"))?;
        Ok(EncoderParams {
            pos_embed,
            blocks,
            norm,
        })
    }

    pub fn forward<R>(
        &self,
        params: &EncoderParams,
        inputs: &Tensor,
        is_training: bool,
        rng: &mut R,
    ) -> Result<Tensor>
    where
        R: Rng + ?Sized,
    {
        if params.blocks.len() != self.num_layers {
            return Err(ModelError::configuration(format!(
                "encoder has {} layers but {} block parameter sets were supplied",
                self.num_layers,
                params.blocks.len()
            )));
        }
        log::trace!(
            "encoder forward input={:?} layers={} training={is_training}",
            inputs.dims(),
            self.num_layers
        );
        let x = self.pos_embed.forward(&params.pos_embed, inputs)?;
        let mut x = self.dropout.forward(&x, is_training, rng)?;
        for block_params in &params.blocks {
            x = self.block.forward(block_params, &x, is_training, rng)?;
        }
        Ok(self.norm.forward(&params.norm, &x, &self.policy)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use layers::ParameterSet;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn blocks_get_independent_parameters() -> Result<()> {
        let device = Device::Cpu;
        let encoder = Encoder::new(&EncoderConfig::new(3, 2))?;
        let set = ParameterSet::initialize(DType::F32, &device, |vb| {
            encoder.init(&[1, 4, 8], vb.pp("Encoder_0"))
        })?;
        assert_eq!(set.params().blocks.len(), 3);
        let first = set
            .get("Encoder_0.EncoderBlock_0.FFBlock_0.Dense_0.kernel")?
            .expect("block 0");
        let last = set
            .get("Encoder_0.EncoderBlock_2.FFBlock_0.Dense_0.kernel")?
            .expect("block 2");
        let diff = first.sub(&last)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff > 0.0);
        assert!(set.get("Encoder_0.AddAbsPosEmbed_0.pos_embed")?.is_some());
        assert!(set.get("Encoder_0.LayerNorm_0.scale")?.is_some());

        let input = Tensor::randn(0f32, 1.0, (1, 4, 8), &device)?;
        let output = encoder.forward(set.params(), &input, false, &mut StdRng::seed_from_u64(0))?;
        assert_eq!(output.dims(), &[1, 4, 8]);
        Ok(())
    }

    #[test]
    fn zero_layers_are_rejected() {
        let err = Encoder::new(&EncoderConfig::new(0, 2)).unwrap_err();
        assert!(err.is_configuration_error());
    }
}
