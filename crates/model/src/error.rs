//! Error type for model assembly, configuration loading and forward passes.

use attention::AttentionError;
use layers::LayerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Every problem found while validating a configuration.
    #[error("invalid configuration: {}", .0.join("; "))]
    Configuration(Vec<String>),
    #[error("invalid tensor shape for {context}: {message}")]
    Shape {
        context: &'static str,
        message: String,
    },
    #[error(transparent)]
    Attention(#[from] AttentionError),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl ModelError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(vec![message.into()])
    }

    pub(crate) fn shape(context: &'static str, message: impl Into<String>) -> Self {
        Self::Shape {
            context,
            message: message.into(),
        }
    }

    /// True for shape violations raised here or by any wrapped layer.
    pub fn is_shape_error(&self) -> bool {
        match self {
            ModelError::Shape { .. } => true,
            ModelError::Attention(err) => err.is_shape(),
            ModelError::Layer(err) => err.is_shape(),
            _ => false,
        }
    }

    /// True for configuration violations raised here or by any wrapped layer.
    pub fn is_configuration_error(&self) -> bool {
        match self {
            ModelError::Configuration(_) => true,
            ModelError::Attention(err) => err.is_configuration(),
            ModelError::Layer(err) => err.is_configuration(),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for ModelError {
    fn from(err: toml::de::Error) -> Self {
        ModelError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
