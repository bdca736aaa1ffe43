//! Position-wise feed-forward block.
//!
//! The block operates on `(batch, seq, hidden)` and returns the same layout:
//! `Dense_0` expands to `floor(hidden * expand_ratio)`, the activation runs, dropout is
//! applied, `Dense_1` contracts back to `hidden`, and dropout runs once more.

use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use rand::Rng;

use crate::{
    activations::ActivationKind,
    checks,
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    error::{LayerError, Result},
    init::Initializer,
    linear::{Dense, DenseParams},
};

/// Configuration of the feed-forward sublayer.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Multiplier applied to the input width for the hidden layer.
    pub expand_ratio: f32,
    /// Dropout after the activation and after the output projection.
    pub dropout_rate: f32,
    pub activation: ActivationKind,
    pub dtype: DType,
    pub kernel_init: Initializer,
    pub bias_init: Initializer,
}

impl Default for FeedForwardConfig {
    fn default() -> Self {
        Self {
            expand_ratio: 4.0,
            dropout_rate: 0.0,
            activation: ActivationKind::Gelu,
            dtype: DType::F32,
            kernel_init: Initializer::default(),
            bias_init: Initializer::Zeros,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedForwardParams {
    pub dense_0: DenseParams,
    pub dense_1: DenseParams,
}

#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    dropout: Dropout,
    policy: PrecisionPolicy,
}

impl FeedForward {
    pub fn new(config: FeedForwardConfig) -> Result<Self> {
        if !(config.expand_ratio.is_finite() && config.expand_ratio > 0.0) {
            return Err(LayerError::Configuration(format!(
                "expand_ratio must be positive, got {}",
                config.expand_ratio
            )));
        }
        let dropout = Dropout::new(config.dropout_rate)?;
        let policy = PrecisionPolicy::from_parameter_dtype(config.dtype);
        Ok(Self {
            config,
            dropout,
            policy,
        })
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    /// Width of the expanded hidden layer for inputs with `features` channels.
    pub fn hidden_features(&self, features: usize) -> Result<usize> {
        let hidden = (features as f64 * f64::from(self.config.expand_ratio)) as usize;
        checks::expect_positive("feed_forward.hidden_features", hidden)?;
        Ok(hidden)
    }

    pub fn init(&self, features: usize, vb: VarBuilder<'_>) -> Result<FeedForwardParams> {
        checks::expect_positive("feed_forward.features", features)?;
        let hidden = self.hidden_features(features)?;
        let dense_0 = self.dense(hidden)?.init(features, vb.pp("Dense_0"))?;
        let dense_1 = self.dense(features)?.init(hidden, vb.pp("Dense_1"))?;
        Ok(FeedForwardParams { dense_0, dense_1 })
    }

    pub fn forward<R>(
        &self,
        params: &FeedForwardParams,
        hidden: &Tensor,
        is_training: bool,
        rng: &mut R,
    ) -> Result<Tensor>
    where
        R: Rng + ?Sized,
    {
        let features = params.dense_1.kernel.dims()[1];
        let expanded = params.dense_0.kernel.dims()[1];
        checks::expect_batch_seq_hidden("feed_forward.input", hidden, features)?;

        let x = self.dense(expanded)?.forward(&params.dense_0, hidden, &self.policy)?;
        let x = self.config.activation.forward(&x, &self.policy)?;
        let x = self.dropout.forward(&x, is_training, rng)?;
        let x = self.dense(features)?.forward(&params.dense_1, &x, &self.policy)?;
        self.dropout.forward(&x, is_training, rng)
    }

    fn dense(&self, features: usize) -> Result<Dense> {
        Ok(Dense::new(features, true)?
            .with_kernel_init(self.config.kernel_init)
            .with_bias_init(self.config.bias_init))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSet;
    use candle_core::Device;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn feed_forward_preserves_shape_and_expands_hidden_width() -> Result<()> {
        let device = Device::Cpu;
        let ff = FeedForward::new(FeedForwardConfig::default())?;
        let set = ParameterSet::initialize(DType::F32, &device, |vb| ff.init(8, vb.pp("FFBlock_0")))?;
        let names: Vec<String> = set.named_parameters()?.into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "FFBlock_0.Dense_0.bias",
                "FFBlock_0.Dense_0.kernel",
                "FFBlock_0.Dense_1.bias",
                "FFBlock_0.Dense_1.kernel",
            ]
        );
        assert_eq!(set.params().dense_0.kernel.dims(), &[8, 32]);
        assert_eq!(set.params().dense_1.kernel.dims(), &[32, 8]);

        let input = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?;
        let output = ff.forward(set.params(), &input, false, &mut StdRng::seed_from_u64(0))?;
        assert_eq!(output.dims(), &[2, 5, 8]);
        Ok(())
    }

    #[test]
    fn fractional_expand_ratio_truncates_hidden_width() -> Result<()> {
        let ff = FeedForward::new(FeedForwardConfig {
            expand_ratio: 1.5,
            ..FeedForwardConfig::default()
        })?;
        assert_eq!(ff.hidden_features(5)?, 7);
        let set = ParameterSet::initialize(DType::F32, &Device::Cpu, |vb| ff.init(5, vb))?;
        assert_eq!(set.params().dense_0.kernel.dims(), &[5, 7]);
        assert_eq!(set.params().dense_1.kernel.dims(), &[7, 5]);
        Ok(())
    }

    #[test]
    fn zeroed_output_projection_yields_zeros() -> Result<()> {
        let device = Device::Cpu;
        let ff = FeedForward::new(FeedForwardConfig {
            expand_ratio: 2.0,
            ..FeedForwardConfig::default()
        })?;
        let mut set = ParameterSet::initialize(DType::F32, &device, |vb| ff.init(4, vb))?;
        set.set("Dense_1.kernel", &Tensor::zeros((8, 4), DType::F32, &device)?)?;
        let input = Tensor::randn(0f32, 1.0, (1, 3, 4), &device)?;
        let output = ff.forward(set.params(), &input, true, &mut StdRng::seed_from_u64(1))?;
        assert_eq!(output.abs()?.max_all()?.to_vec0::<f32>()?, 0.0);
        Ok(())
    }

    #[test]
    fn invalid_ratios_are_configuration_errors() {
        let err = FeedForward::new(FeedForwardConfig {
            expand_ratio: 0.0,
            ..FeedForwardConfig::default()
        })
        .unwrap_err();
        assert!(err.is_configuration());
        let ff = FeedForward::new(FeedForwardConfig {
            expand_ratio: 0.1,
            ..FeedForwardConfig::default()
        })
        .unwrap();
        assert!(ff.hidden_features(4).unwrap_err().is_configuration());
    }
}
