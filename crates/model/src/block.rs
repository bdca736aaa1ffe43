//! Pre-norm transformer encoder block.
//!
//! ```text
//! x1  = inputs + SelfAttentionBlock_0(LayerNorm_0(inputs))
//! out = x1     + FFBlock_0(LayerNorm_1(x1))
//! ```
//!
//! Both residual paths carry the un-normalized tensor.

use attention::{SelfAttentionBlock, SelfAttentionParams};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use layers::{
    checks, residual_add, FeedForward, FeedForwardParams, LayerNorm, LayerNormParams,
    PrecisionPolicy,
};
use rand::Rng;

use crate::config::EncoderConfig;
use crate::error::{ModelError, Result};

/// Parameters of one [`EncoderBlock`].
#[derive(Debug, Clone)]
pub struct EncoderBlockParams {
    pub norm_0: LayerNormParams,
    pub attention: SelfAttentionParams,
    pub norm_1: LayerNormParams,
    pub feed_forward: FeedForwardParams,
}

#[derive(Debug, Clone)]
pub struct EncoderBlock {
    norm: LayerNorm,
    attention: SelfAttentionBlock,
    feed_forward: FeedForward,
    policy: PrecisionPolicy,
}

impl EncoderBlock {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            norm: LayerNorm::default(),
            attention: SelfAttentionBlock::new(config.attention_config())?,
            feed_forward: FeedForward::new(config.feed_forward_config())?,
            policy: PrecisionPolicy::from_parameter_dtype(config.precision.dtype()),
        })
    }

    /// Creates the block parameters for inputs shaped `(batch, seq_len, channels)`.
    pub fn init(&self, input_shape: &[usize], vb: VarBuilder<'_>) -> Result<EncoderBlockParams> {
        let channels = match input_shape {
            [_, _, c] => *c,
            other => {
                return Err(ModelError::shape(
                    "encoder_block.init",
                    format!("expected [batch, seq_len, channels], got {other:?}"),
                ))
            }
        };
        let norm_0 = self.norm.init(channels, vb.pp("LayerNorm_0"))?;
        let attention = self
            .attention
            .init(channels, vb.pp("SelfAttentionBlock_0"))?;
        let norm_1 = self.norm.init(channels, vb.pp("LayerNorm_1"))?;
        let feed_forward = self.feed_forward.init(channels, vb.pp("FFBlock_0"))?;
        log::debug!(
            "encoder block init channels={channels} heads={} expand_ratio={}",
            self.attention.config().num_heads,
            self.feed_forward.config().expand_ratio
        );
        Ok(EncoderBlockParams {
            norm_0,
            attention,
            norm_1,
            feed_forward,
        })
    }

    pub fn forward<R>(
        &self,
        params: &EncoderBlockParams,
        inputs: &Tensor,
        is_training: bool,
        rng: &mut R,
    ) -> Result<Tensor>
    where
        R: Rng + ?Sized,
    {
        checks::expect_rank("encoder_block.input", inputs, 3)?;

        let x = self.norm.forward(&params.norm_0, inputs, &self.policy)?;
        let x = self
            .attention
            .forward(&params.attention, &x, is_training, rng)?;
        let x = residual_add("encoder_block.attention", &x, inputs, &self.policy)?;

        let y = self.norm.forward(&params.norm_1, &x, &self.policy)?;
        let y = self
            .feed_forward
            .forward(&params.feed_forward, &y, is_training, rng)?;
        Ok(residual_add("encoder_block.feed_forward", &y, &x, &self.policy)?)
    }
}
