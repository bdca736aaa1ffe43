//! Configuration options shared by attention layers.
//!
//! [`AttentionConfig`] is fixed at construction. Head geometry that depends on
//! the input width (`head_ch`, `out_ch`) is resolved per input through
//! [`AttentionConfig::resolve`].

use candle_core::DType;
use layers::{checks, Initializer};

use super::errors::AttentionError;

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionConfig {
    pub num_heads: usize,
    /// Per-head width; defaults to `in_channels / num_heads`.
    pub head_ch: Option<usize>,
    /// Output width; defaults to `in_channels`.
    pub out_ch: Option<usize>,
    /// Learned `(num_heads, num_heads)` mixing before and after the softmax.
    pub talking_heads: bool,
    /// Dropout applied to the attention weights during training.
    pub attn_drop_rate: f32,
    /// Dropout applied to the projected output during training.
    pub out_drop_rate: f32,
    pub use_bias: bool,
    pub dtype: DType,
    pub kernel_init: Initializer,
    pub bias_init: Initializer,
}

impl AttentionConfig {
    pub fn new(num_heads: usize) -> Self {
        Self {
            num_heads,
            head_ch: None,
            out_ch: None,
            talking_heads: false,
            attn_drop_rate: 0.0,
            out_drop_rate: 0.0,
            use_bias: false,
            dtype: DType::F32,
            kernel_init: Initializer::default(),
            bias_init: Initializer::Zeros,
        }
    }

    /// Checks everything that does not depend on the input width.
    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.num_heads == 0 {
            return Err(AttentionError::config("num_heads must be greater than zero"));
        }
        if self.head_ch == Some(0) {
            return Err(AttentionError::config("head_ch must be greater than zero"));
        }
        if self.out_ch == Some(0) {
            return Err(AttentionError::config("out_ch must be greater than zero"));
        }
        checks::expect_rate("attn_drop_rate", self.attn_drop_rate)?;
        checks::expect_rate("out_drop_rate", self.out_drop_rate)?;
        Ok(())
    }

    /// Resolves the head geometry for inputs with `in_ch` channels.
    pub fn resolve(&self, in_ch: usize) -> Result<HeadLayout, AttentionError> {
        self.validate()?;
        checks::expect_positive("input channels", in_ch)?;
        checks::expect_divisible("input channels", in_ch, "num_heads", self.num_heads)?;
        Ok(HeadLayout {
            num_heads: self.num_heads,
            head_ch: self.head_ch.unwrap_or(in_ch / self.num_heads),
            out_ch: self.out_ch.unwrap_or(in_ch),
        })
    }
}

/// Head geometry of one attention instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadLayout {
    pub num_heads: usize,
    pub head_ch: usize,
    pub out_ch: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_input_width() {
        let layout = AttentionConfig::new(2).resolve(8).unwrap();
        assert_eq!(
            layout,
            HeadLayout {
                num_heads: 2,
                head_ch: 4,
                out_ch: 8
            }
        );
    }

    #[test]
    fn explicit_widths_override_defaults() {
        let config = AttentionConfig {
            head_ch: Some(16),
            out_ch: Some(6),
            ..AttentionConfig::new(4)
        };
        let layout = config.resolve(8).unwrap();
        assert_eq!(layout.head_ch, 16);
        assert_eq!(layout.out_ch, 6);
    }

    #[test]
    fn indivisible_channels_and_bad_rates_are_configuration_errors() {
        assert!(AttentionConfig::new(3).resolve(8).unwrap_err().is_configuration());
        assert!(AttentionConfig::new(0).validate().unwrap_err().is_configuration());
        let config = AttentionConfig {
            attn_drop_rate: 1.5,
            ..AttentionConfig::new(2)
        };
        assert!(config.validate().unwrap_err().is_configuration());
    }
}
