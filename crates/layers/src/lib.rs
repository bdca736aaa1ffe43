//! Building blocks for vision transformer layers.
//!
//! Every layer follows the same two-phase shape: a configuration-only module
//! exposes `init(.., VarBuilder)` that creates its named parameters, and a
//! `forward(&params, ..)` that is a pure function of those parameters, the
//! input and (where dropout is involved) a caller-supplied RNG. Parameters are
//! owned by a [`ParameterSet`](params::ParameterSet), never by the module.

pub mod activations;
pub mod checks;
pub mod dropout;
pub mod dtypes;
pub mod error;
pub mod init;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod params;
pub mod residual;

pub use activations::ActivationKind;
pub use dropout::Dropout;
pub use dtypes::{Precision, PrecisionPolicy};
pub use error::{LayerError, Result};
pub use init::{Fans, Initializer};
pub use linear::{Dense, DenseGeneral, DenseParams, GeneralLayout};
pub use mlp::{FeedForward, FeedForwardConfig, FeedForwardParams};
pub use norm::{LayerNorm, LayerNormParams};
pub use params::ParameterSet;
pub use residual::residual_add;
