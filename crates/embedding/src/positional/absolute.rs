//! Learned absolute positional embedding.
//!
//! One `(1, L, C)` table is created from the sample input shape and added to
//! every sequence in the batch.

use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use layers::{
    checks,
    init::{Fans, Initializer},
    LayerError, PrecisionPolicy, Result,
};

/// Standard deviation of the `pos_embed` initializer.
pub const POS_EMBED_STDDEV: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct PositionalParams {
    pub pos_embed: Tensor,
}

#[derive(Debug, Clone)]
pub struct AddAbsolutePositionalEmbedding {
    init: Initializer,
    policy: PrecisionPolicy,
}

impl AddAbsolutePositionalEmbedding {
    pub fn new(dtype: DType) -> Self {
        Self {
            init: Initializer::Normal {
                stddev: POS_EMBED_STDDEV,
            },
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        }
    }

    /// Creates `pos_embed` for inputs shaped `(batch, seq_len, channels)`.
    pub fn init(&self, input_shape: &[usize], vb: VarBuilder<'_>) -> Result<PositionalParams> {
        let (seq_len, channels) = match input_shape {
            [_, l, c] => (*l, *c),
            other => {
                return Err(LayerError::Shape {
                    context: "pos_embed.init",
                    message: format!("expected [batch, seq_len, channels], got {other:?}"),
                })
            }
        };
        checks::expect_positive("pos_embed.seq_len", seq_len)?;
        checks::expect_positive("pos_embed.channels", channels)?;
        let pos_embed = self.init.create(
            &vb,
            (1, seq_len, channels),
            "pos_embed",
            Fans::new(seq_len, channels),
        )?;
        Ok(PositionalParams { pos_embed })
    }

    pub fn forward(&self, params: &PositionalParams, inputs: &Tensor) -> Result<Tensor> {
        checks::expect_rank("pos_embed.input", inputs, 3)?;
        let (_, seq_len, channels) = params.pos_embed.dims3()?;
        let (batch, _, _) = inputs.dims3()?;
        checks::expect_shape("pos_embed.input", inputs, &[batch, seq_len, channels])?;
        let pos = self.policy.cast_for_matmul(&params.pos_embed)?;
        let summed = self.policy.cast_for_matmul(inputs)?.broadcast_add(&pos)?;
        Ok(self.policy.cast_to_storage(&summed)?)
    }
}
