//! Error types emitted by attention implementations.

use layers::LayerError;

/// Attention-specific error category.
#[derive(Debug)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    InvalidShape { context: String },
    /// The configuration cannot describe a valid attention layer for the input.
    Configuration { message: String },
    /// A projection, norm or dropout site rejected its input.
    Layer(LayerError),
    /// A backend-specific failure propagated to the caller.
    Backend { message: String },
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        AttentionError::InvalidShape {
            context: context.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        AttentionError::Configuration {
            message: message.into(),
        }
    }

    /// True for shape violations, including those reported by inner layers.
    pub fn is_shape(&self) -> bool {
        match self {
            AttentionError::InvalidShape { .. } => true,
            AttentionError::Layer(err) => err.is_shape(),
            _ => false,
        }
    }

    /// True for configuration violations, including those reported by inner layers.
    pub fn is_configuration(&self) -> bool {
        match self {
            AttentionError::Configuration { .. } => true,
            AttentionError::Layer(err) => err.is_configuration(),
            _ => false,
        }
    }
}

impl std::fmt::Display for AttentionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionError::InvalidShape { context } => {
                write!(f, "invalid tensor shape: {context}")
            }
            AttentionError::Configuration { message } => {
                write!(f, "invalid attention configuration: {message}")
            }
            AttentionError::Layer(err) => write!(f, "{err}"),
            AttentionError::Backend { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for AttentionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttentionError::Layer(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LayerError> for AttentionError {
    fn from(err: LayerError) -> Self {
        AttentionError::Layer(err)
    }
}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        AttentionError::Backend {
            message: err.to_string(),
        }
    }
}
