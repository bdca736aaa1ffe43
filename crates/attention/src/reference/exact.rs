//! Reference scaled dot-product attention kernel.
//!
//! The exact path favours numerical fidelity: scores and softmax run in the
//! policy's reduction dtype, and optional talking-heads mixing is applied on
//! either side of the softmax.

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;
use layers::{Dropout, PrecisionPolicy};
use rand::Rng;

use crate::core::{Attention, AttentionError, HeadMixing};

/// Portable attention kernel with train-only weight dropout.
#[derive(Debug, Clone)]
pub struct ExactAttention {
    dropout: Dropout,
    policy: PrecisionPolicy,
}

impl ExactAttention {
    pub fn new(attn_drop_rate: f32, policy: PrecisionPolicy) -> Result<Self, AttentionError> {
        Ok(Self {
            dropout: Dropout::new(attn_drop_rate)?,
            policy,
        })
    }

    pub fn policy(&self) -> &PrecisionPolicy {
        &self.policy
    }

    /// Normalized attention weights `[batch, heads, q_len, k_len]` before
    /// dropout, in the compute dtype. Each `(batch, head, query)` row sums to 1
    /// unless a post-softmax mixing matrix redistributes it.
    pub fn attention_probs(
        &self,
        q: &Tensor,
        k: &Tensor,
        mixing: Option<&HeadMixing>,
    ) -> Result<Tensor, AttentionError> {
        check_operands(q, k)?;
        let (batch, heads, _, head_ch) = per_head_dims(q, "q")?;
        let (kb, kh, k_len, kd) = per_head_dims(k, "k")?;
        if kb != batch || kh != heads || kd != head_ch {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{batch}, {heads}, ?, {head_ch}] got [{kb}, {kh}, {k_len}, {kd}]"
            )));
        }
        if k_len == 0 {
            return Err(AttentionError::shape("k has an empty sequence axis"));
        }

        let q = self.policy.cast_for_matmul(q)?;
        let k = self.policy.cast_for_matmul(k)?;
        let q = q.affine(1.0 / (head_ch as f64).sqrt(), 0.0)?;
        let k_t = k.t()?.contiguous()?;
        let mut scores = q.contiguous()?.matmul(&k_t)?;

        if let Some(mixing) = mixing {
            scores = mix_heads(&scores, &mixing.pre_softmax)?;
        }
        let scores = self.policy.cast_for_reduction(&scores)?.contiguous()?;
        let mut probs = softmax_last_dim(&scores)?.to_dtype(self.policy.compute())?;
        if let Some(mixing) = mixing {
            probs = mix_heads(&probs, &mixing.post_softmax)?;
        }
        Ok(probs)
    }
}

impl Attention for ExactAttention {
    fn attend<R>(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mixing: Option<&HeadMixing>,
        is_training: bool,
        rng: &mut R,
    ) -> Result<Tensor, AttentionError>
    where
        R: Rng + ?Sized,
    {
        let probs = self.attention_probs(q, k, mixing)?;
        let (batch, heads, _, head_ch) = per_head_dims(q, "q")?;
        let (_, _, k_len, _) = per_head_dims(k, "k")?;
        if v.dtype() != q.dtype() || !v.device().same_device(q.device()) {
            return Err(AttentionError::shape(
                "v must share the dtype and device of q",
            ));
        }
        let (vb, vh, vk, vd) = per_head_dims(v, "v")?;
        if vb != batch || vh != heads || vk != k_len || vd != head_ch {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_ch}] got [{vb}, {vh}, {vk}, {vd}]"
            )));
        }

        log::trace!(
            "attention::exact batch={batch} heads={heads} k_len={k_len} training={is_training}"
        );
        let probs = self.dropout.forward(&probs, is_training, rng)?;
        let v = self.policy.cast_for_matmul(v)?.contiguous()?;
        let context = probs.contiguous()?.matmul(&v)?;
        Ok(self.policy.cast_to_storage(&context)?)
    }
}

/// Mixes `weights` `[batch, heads, q_len, k_len]` across the head axis:
/// `out[b, j, q, k] = sum_i weights[b, i, q, k] * transform[i, j]`.
pub fn mix_heads(weights: &Tensor, transform: &Tensor) -> Result<Tensor, AttentionError> {
    let (batch, heads, q_len, k_len) = per_head_dims(weights, "attention weights")?;
    if transform.dims() != [heads, heads] {
        return Err(AttentionError::shape(format!(
            "head mixing matrix must be [{heads}, {heads}], got {:?}",
            transform.dims()
        )));
    }
    let transform = transform.to_dtype(weights.dtype())?;
    let mixed = weights
        .permute((0, 2, 3, 1))?
        .contiguous()?
        .reshape((batch * q_len * k_len, heads))?
        .matmul(&transform)?
        .reshape((batch, q_len, k_len, heads))?
        .permute((0, 3, 1, 2))?
        .contiguous()?;
    Ok(mixed)
}

fn per_head_dims(
    tensor: &Tensor,
    name: &str,
) -> Result<(usize, usize, usize, usize), AttentionError> {
    tensor.dims4().map_err(|_| {
        AttentionError::shape(format!(
            "{name} must have shape [batch, heads, seq_len, head_ch], got {:?}",
            tensor.dims()
        ))
    })
}

fn check_operands(q: &Tensor, k: &Tensor) -> Result<(), AttentionError> {
    if !q.device().same_device(k.device()) {
        return Err(AttentionError::shape("q and k must reside on the same device"));
    }
    if q.dtype() != k.dtype() {
        return Err(AttentionError::shape("q and k must share the same dtype"));
    }
    if !matches!(q.dtype(), DType::F32 | DType::F16 | DType::BF16 | DType::F64) {
        return Err(AttentionError::config(format!(
            "unsupported attention dtype {:?}",
            q.dtype()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Result as CandleResult};
    use rand::{rngs::StdRng, SeedableRng};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let q = Tensor::randn(0f32, 1.0, (1, 2, 4, 8), device)?;
        let k = Tensor::randn(0f32, 1.0, (1, 2, 6, 8), device)?;
        let v = Tensor::randn(0f32, 1.0, (1, 2, 6, 8), device)?;
        Ok((q, k, v))
    }

    fn naive_attention(q: &Tensor, k: &Tensor, v: &Tensor) -> CandleResult<Tensor> {
        let (batch, heads, q_len, head_dim) = q.dims4()?;
        let (_, _, k_len, _) = k.dims4()?;
        let q_vec = q.flatten_all()?.to_vec1::<f32>()?;
        let k_vec = k.flatten_all()?.to_vec1::<f32>()?;
        let v_vec = v.flatten_all()?.to_vec1::<f32>()?;
        let scale = 1.0 / (head_dim as f32).sqrt();
        let mut output = vec![0f32; batch * heads * q_len * head_dim];

        for bh in 0..batch * heads {
            for q_idx in 0..q_len {
                let mut row = vec![0f32; k_len];
                for (k_idx, slot) in row.iter_mut().enumerate() {
                    let mut dot = 0f32;
                    for d in 0..head_dim {
                        dot += q_vec[(bh * q_len + q_idx) * head_dim + d]
                            * k_vec[(bh * k_len + k_idx) * head_dim + d];
                    }
                    *slot = dot * scale;
                }
                let max_val = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let denom: f32 = row.iter().map(|s| (s - max_val).exp()).sum();
                for d in 0..head_dim {
                    let mut acc = 0f32;
                    for (k_idx, score) in row.iter().enumerate() {
                        acc += (score - max_val).exp() / denom
                            * v_vec[(bh * k_len + k_idx) * head_dim + d];
                    }
                    output[(bh * q_len + q_idx) * head_dim + d] = acc;
                }
            }
        }
        Tensor::from_vec(output, (batch, heads, q_len, head_dim), q.device())
    }

    fn max_diff(a: &Tensor, b: &Tensor) -> CandleResult<f32> {
        a.to_dtype(DType::F32)?
            .sub(&b.to_dtype(DType::F32)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()
    }

    #[test]
    fn exact_attention_matches_naive() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let attention = ExactAttention::new(0.0, PrecisionPolicy::default())?;
        let output = attention.attend(&q, &k, &v, None, false, &mut StdRng::seed_from_u64(0))?;
        assert_eq!(output.dims(), &[1, 2, 4, 8]);
        let expected = naive_attention(&q, &k, &v)?;
        assert!(max_diff(&output, &expected)? < 1e-4);
        Ok(())
    }

    #[test]
    fn probabilities_sum_to_one_per_row() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, _) = build_inputs(&device)?;
        let attention = ExactAttention::new(0.0, PrecisionPolicy::default())?;
        let probs = attention.attention_probs(&q, &k, None)?;
        assert_eq!(probs.dims(), &[1, 2, 4, 6]);
        let sums = probs.sum(3)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn mix_heads_matches_explicit_sum() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let weights = Tensor::randn(0f32, 1.0, (2, 3, 4, 5), &device)?;
        let transform = Tensor::randn(0f32, 1.0, (3, 3), &device)?;
        let mixed = mix_heads(&weights, &transform)?;

        let m = transform.to_vec2::<f32>()?;
        for b in 0..2 {
            for j in 0..3 {
                let mut expected = weights.get(b)?.get(0)?.affine(f64::from(m[0][j]), 0.0)?;
                for (i, row) in m.iter().enumerate().skip(1) {
                    let term = weights.get(b)?.get(i)?.affine(f64::from(row[j]), 0.0)?;
                    expected = expected.add(&term)?;
                }
                let got = mixed.get(b)?.get(j)?;
                assert!(max_diff(&got, &expected)? < 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn mismatched_shapes_error() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let k = Tensor::zeros((1, 3, 4, 8), DType::F32, &device)?;
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let attention = ExactAttention::new(0.0, PrecisionPolicy::default()).unwrap();
        let err = attention
            .attend(&q, &k, &v, None, false, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));

        let flat = Tensor::zeros((4, 8), DType::F32, &device)?;
        let err = attention.attention_probs(&flat, &k, None).unwrap_err();
        assert!(err.is_shape());

        let wrong_mix = HeadMixing {
            pre_softmax: Tensor::zeros((3, 3), DType::F32, &device)?,
            post_softmax: Tensor::zeros((3, 3), DType::F32, &device)?,
        };
        let err = attention.attention_probs(&q, &v, Some(&wrong_mix)).unwrap_err();
        assert!(err.is_shape());

        let empty = Tensor::zeros((1, 2, 0, 8), DType::F32, &device)?;
        let err = attention
            .attend(&v, &empty, &empty, None, false, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(err.is_shape());
        Ok(())
    }

    #[test]
    fn dtype_matrix() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mut rng = StdRng::seed_from_u64(0);
        let reference = ExactAttention::new(0.0, PrecisionPolicy::default())?
            .attend(&q, &k, &v, None, false, &mut rng)?;
        for dtype in [DType::F32, DType::BF16, DType::F16] {
            let attention = ExactAttention::new(0.0, PrecisionPolicy::from_parameter_dtype(dtype))?;
            let out = attention.attend(
                &q.to_dtype(dtype)?,
                &k.to_dtype(dtype)?,
                &v.to_dtype(dtype)?,
                None,
                false,
                &mut rng,
            )?;
            assert_eq!(out.dtype(), dtype);
            let max = max_diff(&out, &reference)?;
            assert!(max < 5e-2, "dtype {dtype:?} diverged by {max}");
        }
        Ok(())
    }

    #[test]
    fn numerical_stability() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::full(10_000.0f32, (1, 1, 4, 4), &device)?;
        let k = Tensor::full(-10_000.0f32, (1, 1, 4, 4), &device)?;
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device)?;
        let out = ExactAttention::new(0.0, PrecisionPolicy::default())?
            .attend(&q, &k, &v, None, false, &mut StdRng::seed_from_u64(0))?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(out.iter().all(|value| value.is_finite()));
        Ok(())
    }

    #[test]
    fn inactive_dropout_leaves_rng_untouched() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mut rng = StdRng::seed_from_u64(5);
        let train = ExactAttention::new(0.0, PrecisionPolicy::default())?
            .attend(&q, &k, &v, None, true, &mut rng)?;
        let eval = ExactAttention::new(0.5, PrecisionPolicy::default())?
            .attend(&q, &k, &v, None, false, &mut rng)?;
        assert_eq!(max_diff(&train, &eval)?, 0.0);
        assert_eq!(rng.gen::<u64>(), StdRng::seed_from_u64(5).gen::<u64>());
        Ok(())
    }
}
