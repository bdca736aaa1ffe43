//! Error type shared by every layer in this crate.

use thiserror::Error;

/// Failure raised while building or evaluating a layer.
#[derive(Debug, Error)]
pub enum LayerError {
    /// A tensor does not satisfy the documented layout for `context`.
    #[error("invalid shape for {context}: {message}")]
    Shape {
        context: &'static str,
        message: String,
    },
    /// Hyperparameters are inconsistent with each other or with the input.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// Backend failure propagated from Candle.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

impl LayerError {
    pub(crate) fn shape(context: &'static str, message: impl Into<String>) -> Self {
        Self::Shape {
            context,
            message: message.into(),
        }
    }

    /// True for rank or extent violations.
    pub fn is_shape(&self) -> bool {
        matches!(self, Self::Shape { .. })
    }

    /// True for hyperparameter violations.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, LayerError>;
