//! Encoder and ViT hyperparameters.
//!
//! Both configs deserialize from TOML or JSON. Optional fields fall back to
//! the defaults of the reference architecture: `expand_ratio = 4`, no dropout,
//! tanh-approximated GELU, `f32` parameters, Kaiming-uniform kernels and zero
//! biases. The attention-dropout key is `attn_drop_rate`; `attn_dropout_rate`
//! is accepted as an alias.

use std::{fs, path::Path};

use attention::AttentionConfig;
use layers::{
    init::default_bias_init, ActivationKind, FeedForwardConfig, Initializer, Precision,
};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

fn default_expand_ratio() -> f32 {
    4.0
}

/// Hyperparameters shared by the encoder and each of its blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub num_layers: usize,
    pub num_heads: usize,
    #[serde(default = "default_expand_ratio")]
    pub expand_ratio: f32,
    #[serde(default, alias = "attn_dropout_rate")]
    pub attn_drop_rate: f32,
    #[serde(default)]
    pub dropout_rate: f32,
    #[serde(default)]
    pub talking_heads: bool,
    #[serde(default)]
    pub activation: ActivationKind,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub kernel_init: Initializer,
    #[serde(default = "default_bias_init")]
    pub bias_init: Initializer,
}

impl EncoderConfig {
    pub fn new(num_layers: usize, num_heads: usize) -> Self {
        Self {
            num_layers,
            num_heads,
            expand_ratio: default_expand_ratio(),
            attn_drop_rate: 0.0,
            dropout_rate: 0.0,
            talking_heads: false,
            activation: ActivationKind::default(),
            precision: Precision::default(),
            kernel_init: Initializer::default(),
            bias_init: default_bias_init(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let errors = self.problems();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Configuration(errors))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.num_layers == 0 {
            errors.push("num_layers must be greater than 0".to_string());
        }
        if self.num_heads == 0 {
            errors.push("num_heads must be greater than 0".to_string());
        }
        if !(self.expand_ratio.is_finite() && self.expand_ratio > 0.0) {
            errors.push(format!(
                "expand_ratio must be positive, got {}",
                self.expand_ratio
            ));
        }
        for (name, rate) in [
            ("attn_drop_rate", self.attn_drop_rate),
            ("dropout_rate", self.dropout_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                errors.push(format!("{name} must be in [0, 1], got {rate}"));
            }
        }
        errors
    }

    /// Self-attention sublayer settings: weight dropout from `attn_drop_rate`,
    /// output dropout from `dropout_rate`.
    pub fn attention_config(&self) -> AttentionConfig {
        AttentionConfig {
            talking_heads: self.talking_heads,
            attn_drop_rate: self.attn_drop_rate,
            out_drop_rate: self.dropout_rate,
            dtype: self.precision.dtype(),
            kernel_init: self.kernel_init,
            bias_init: self.bias_init,
            ..AttentionConfig::new(self.num_heads)
        }
    }

    pub fn feed_forward_config(&self) -> FeedForwardConfig {
        FeedForwardConfig {
            expand_ratio: self.expand_ratio,
            dropout_rate: self.dropout_rate,
            activation: self.activation,
            dtype: self.precision.dtype(),
            kernel_init: self.kernel_init,
            bias_init: self.bias_init,
        }
    }
}

/// Full classifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViTConfig {
    pub num_classes: usize,
    pub embed_dim: usize,
    /// Patch `(height, width)` in pixels.
    pub patch_shape: (usize, usize),
    #[serde(flatten)]
    pub encoder: EncoderConfig,
}

impl ViTConfig {
    pub fn new(
        num_classes: usize,
        num_layers: usize,
        num_heads: usize,
        embed_dim: usize,
        patch_shape: (usize, usize),
    ) -> Self {
        Self {
            num_classes,
            embed_dim,
            patch_shape,
            encoder: EncoderConfig::new(num_layers, num_heads),
        }
    }

    /// Reads a `.toml` or `.json` file and validates the result.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: ViTConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(ModelError::Parse(format!(
                    "unsupported configuration extension '{other}'"
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = self.encoder.problems();
        if self.num_classes == 0 {
            errors.push("num_classes must be greater than 0".to_string());
        }
        if self.embed_dim == 0 {
            errors.push("embed_dim must be greater than 0".to_string());
        }
        if self.patch_shape.0 == 0 || self.patch_shape.1 == 0 {
            errors.push(format!(
                "patch_shape must be non-zero, got {:?}",
                self.patch_shape
            ));
        }
        if self.encoder.num_heads > 0 && self.embed_dim % self.encoder.num_heads != 0 {
            errors.push(format!(
                "embed_dim ({}) must be divisible by num_heads ({})",
                self.embed_dim, self.encoder.num_heads
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Configuration(errors))
        }
    }
}
