//! Train-only dropout driven by a caller-supplied randomness source.
//!
//! Dropout never owns an RNG. Every call receives `&mut R` and the contract is:
//!
//! * evaluation mode, `rate == 0` or `rate == 1` never touch the stream;
//! * otherwise exactly `input.elem_count()` uniform `f32` samples are drawn.
//!
//! Replaying the same seed therefore reproduces the same masks, and concurrent
//! callers with independent generators cannot interfere with each other.

use candle_core::Tensor;
use rand::Rng;

use crate::{checks, error::Result};

/// Inverted dropout: kept activations are scaled by `1 / (1 - rate)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    rate: f32,
}

impl Dropout {
    /// Fails with a configuration error unless `rate` lies in `[0, 1]`.
    pub fn new(rate: f32) -> Result<Self> {
        checks::expect_rate("dropout rate", rate)?;
        Ok(Self { rate })
    }

    /// True when a training-mode call would consume randomness.
    pub fn is_active(&self, is_training: bool) -> bool {
        is_training && self.rate > 0.0 && self.rate < 1.0
    }

    pub fn forward<R>(&self, input: &Tensor, is_training: bool, rng: &mut R) -> Result<Tensor>
    where
        R: Rng + ?Sized,
    {
        if is_training && self.rate >= 1.0 {
            return Ok(input.zeros_like()?);
        }
        if !self.is_active(is_training) {
            return Ok(input.clone());
        }

        let keep_prob = 1.0 - self.rate;
        let scale = 1.0 / keep_prob;
        let mask: Vec<f32> = (0..input.elem_count())
            .map(|_| {
                if rng.gen::<f32>() < keep_prob {
                    scale
                } else {
                    0.0
                }
            })
            .collect();
        let mask = Tensor::from_vec(mask, input.shape().clone(), input.device())?
            .to_dtype(input.dtype())?;
        Ok(input.mul(&mask)?)
    }
}

impl Default for Dropout {
    fn default() -> Self {
        Self { rate: 0.0 }
    }
}
