//! Parameter initialisation strategies.
//!
//! Every parameter in the workspace is created through
//! [`VarBuilder::get_with_hints`], so strategies resolve to a
//! [`candle_nn::Init`] once the fan-in/fan-out of the kernel is known. Kernels
//! with more than two axes report their *flattened* input and output extents
//! (e.g. a `(in, heads, head_ch)` projection has `fan_in = in` and
//! `fan_out = heads * head_ch`).

use candle_core::{Shape, Tensor};
use candle_nn::{Init, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Logical fan-in and fan-out of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fans {
    pub fan_in: usize,
    pub fan_out: usize,
}

impl Fans {
    pub fn new(fan_in: usize, fan_out: usize) -> Self {
        Self { fan_in, fan_out }
    }

    /// Fans for a vector parameter such as a bias or a norm scale.
    pub fn vector(len: usize) -> Self {
        Self::new(len, len)
    }
}

/// Supported weight initialisation policies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Initializer {
    /// Kaiming/He uniform, `bound = sqrt(3) * gain / sqrt(fan_in)`.
    KaimingUniform {
        #[serde(default)]
        negative_slope: f64,
    },
    /// Kaiming/He normal, `std = gain / sqrt(fan_in)`.
    KaimingNormal {
        #[serde(default)]
        negative_slope: f64,
    },
    /// Xavier/Glorot uniform.
    XavierUniform,
    /// Xavier/Glorot normal.
    XavierNormal,
    /// Zero-mean normal with a fixed standard deviation.
    Normal { stddev: f64 },
    Zeros,
    Ones,
    Constant { value: f64 },
}

impl Initializer {
    /// Default kernel initialiser (fan-in aware uniform, ReLU gain).
    pub const fn kaiming_uniform() -> Self {
        Self::KaimingUniform {
            negative_slope: 0.0,
        }
    }

    /// Resolves the strategy for a kernel with the given fans.
    pub fn to_init(&self, fans: Fans) -> Init {
        let fan_in = fans.fan_in.max(1) as f64;
        let fan_out = fans.fan_out.max(1) as f64;
        match *self {
            Initializer::KaimingUniform { negative_slope } => {
                let bound = 3f64.sqrt() * kaiming_gain(negative_slope) / fan_in.sqrt();
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                }
            }
            Initializer::KaimingNormal { negative_slope } => Init::Randn {
                mean: 0.0,
                stdev: kaiming_gain(negative_slope) / fan_in.sqrt(),
            },
            Initializer::XavierUniform => {
                let bound = (6.0 / (fan_in + fan_out)).sqrt();
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                }
            }
            Initializer::XavierNormal => Init::Randn {
                mean: 0.0,
                stdev: (2.0 / (fan_in + fan_out)).sqrt(),
            },
            Initializer::Normal { stddev } => Init::Randn {
                mean: 0.0,
                stdev: stddev,
            },
            Initializer::Zeros => Init::Const(0.0),
            Initializer::Ones => Init::Const(1.0),
            Initializer::Constant { value } => Init::Const(value),
        }
    }

    /// Creates (or fetches) the parameter `name` under `vb`.
    pub fn create(
        &self,
        vb: &VarBuilder<'_>,
        shape: impl Into<Shape>,
        name: &str,
        fans: Fans,
    ) -> Result<Tensor> {
        Ok(vb.get_with_hints(shape, name, self.to_init(fans))?)
    }
}

impl Default for Initializer {
    fn default() -> Self {
        Self::kaiming_uniform()
    }
}

fn kaiming_gain(negative_slope: f64) -> f64 {
    (2.0 / (1.0 + negative_slope.powi(2))).sqrt()
}

/// Serde default for bias initialisers.
pub fn default_bias_init() -> Initializer {
    Initializer::Zeros
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn tensor_stats(tensor: &Tensor) -> candle_core::Result<(f64, f64, f32)> {
        let values = tensor.flatten_all()?.to_vec1::<f32>()?;
        let mean = values.iter().copied().map(f64::from).sum::<f64>() / values.len() as f64;
        let var = values
            .iter()
            .map(|v| (f64::from(*v) - mean).powi(2))
            .sum::<f64>()
            / values.len() as f64;
        let max_abs = values.iter().fold(0f32, |acc, v| acc.max(v.abs()));
        Ok((mean, var.sqrt(), max_abs))
    }

    #[test]
    fn kaiming_uniform_respects_fan_in_bound() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let kernel = Initializer::default().create(&vb, (64, 4, 16), "kernel", Fans::new(64, 64))?;
        let (_, std, max_abs) = tensor_stats(&kernel)?;
        let bound = (6.0f64 / 64.0).sqrt();
        assert!(f64::from(max_abs) <= bound + 1e-6);
        let expected_std = bound / 3f64.sqrt();
        assert!((std - expected_std).abs() < expected_std * 0.2);
        Ok(())
    }

    #[test]
    fn xavier_normal_stats_are_reasonable() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let kernel = Initializer::XavierNormal.create(&vb, (128, 64), "w", Fans::new(128, 64))?;
        let (mean, std, _) = tensor_stats(&kernel)?;
        let expected = (2.0f64 / 192.0).sqrt();
        assert!(mean.abs() < 5e-3);
        assert!((std - expected).abs() < expected * 0.25);
        Ok(())
    }

    #[test]
    fn constant_initialisers_fill_exactly() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let zeros = Initializer::Zeros.create(&vb, 5, "zeros", Fans::vector(5))?;
        let twos = Initializer::Constant { value: 2.0 }.create(&vb, 3, "twos", Fans::vector(3))?;
        assert_eq!(zeros.to_vec1::<f32>()?, vec![0.0; 5]);
        assert_eq!(twos.to_vec1::<f32>()?, vec![2.0; 3]);
        Ok(())
    }

    #[test]
    fn initializers_parse_from_tagged_config() {
        let init: Initializer = serde_json::from_str(r#"{"kind":"normal","stddev":0.02}"#).unwrap();
        assert_eq!(init, Initializer::Normal { stddev: 0.02 });
        let init: Initializer = serde_json::from_str(r#"{"kind":"kaiming_uniform"}"#).unwrap();
        assert_eq!(init, Initializer::kaiming_uniform());
    }
}
