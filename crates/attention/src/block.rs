//! Multi-head attention layers with learned projections.
//!
//! [`AttentionBlock`] projects queries from one sequence and keys/values from
//! another, runs the [`ExactAttention`] kernel per head and merges the heads
//! back into `out_ch` channels. [`SelfAttentionBlock`] feeds the same sequence
//! to both sides.
//!
//! Parameter layout under an `AttentionBlock` scope:
//!
//! | name           | shape                         |
//! |----------------|-------------------------------|
//! | `queries`      | kernel `(Cq, H, D)`, bias `(H, D)`  |
//! | `keys`         | kernel `(Ckv, H, D)`, bias `(H, D)` |
//! | `values`       | kernel `(Ckv, H, D)`, bias `(H, D)` |
//! | `pre_softmax`  | `(H, H)`, talking heads only  |
//! | `post_softmax` | `(H, H)`, talking heads only  |
//! | `DenseGeneral_0` | kernel `(H, D, out_ch)`, bias `(out_ch,)` |
//!
//! Biases are only present when `use_bias` is set.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use layers::{
    checks,
    init::Fans,
    linear::{DenseGeneral, DenseParams, GeneralLayout},
    Dropout, PrecisionPolicy,
};
use rand::Rng;

use crate::core::{Attention, AttentionConfig, AttentionError, HeadLayout, HeadMixing};
use crate::reference::ExactAttention;

/// Parameters of one [`AttentionBlock`].
#[derive(Debug, Clone)]
pub struct AttentionParams {
    pub queries: DenseParams,
    pub keys: DenseParams,
    pub values: DenseParams,
    pub talking_heads: Option<HeadMixing>,
    pub output: DenseParams,
}

/// Attention from `inputs_q` onto `inputs_kv`.
#[derive(Debug, Clone)]
pub struct AttentionBlock {
    config: AttentionConfig,
    kernel: ExactAttention,
    out_dropout: Dropout,
}

impl AttentionBlock {
    pub fn new(config: AttentionConfig) -> Result<Self, AttentionError> {
        config.validate()?;
        let policy = PrecisionPolicy::from_parameter_dtype(config.dtype);
        let kernel = ExactAttention::new(config.attn_drop_rate, policy)?;
        let out_dropout = Dropout::new(config.out_drop_rate)?;
        Ok(Self {
            config,
            kernel,
            out_dropout,
        })
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// Creates every parameter for query inputs with `q_channels` channels and
    /// key/value inputs with `kv_channels` channels.
    pub fn init(
        &self,
        q_channels: usize,
        kv_channels: usize,
        vb: VarBuilder<'_>,
    ) -> Result<AttentionParams, AttentionError> {
        let layout = self.config.resolve(q_channels)?;
        checks::expect_positive("attention.kv_channels", kv_channels)?;
        let (split, merge) = self.projections(layout)?;

        let queries = split.init(&[q_channels], vb.pp("queries"))?;
        let keys = split.init(&[kv_channels], vb.pp("keys"))?;
        let values = split.init(&[kv_channels], vb.pp("values"))?;
        let talking_heads = if self.config.talking_heads {
            let heads = layout.num_heads;
            let fans = Fans::new(heads, heads);
            let pre_softmax = self
                .config
                .kernel_init
                .create(&vb, (heads, heads), "pre_softmax", fans)?;
            let post_softmax = self
                .config
                .kernel_init
                .create(&vb, (heads, heads), "post_softmax", fans)?;
            Some(HeadMixing {
                pre_softmax,
                post_softmax,
            })
        } else {
            None
        };
        let output = merge.init(
            &[layout.num_heads, layout.head_ch],
            vb.pp("DenseGeneral_0"),
        )?;

        log::debug!(
            "attention block init heads={} head_ch={} out_ch={} talking_heads={}",
            layout.num_heads,
            layout.head_ch,
            layout.out_ch,
            self.config.talking_heads
        );
        Ok(AttentionParams {
            queries,
            keys,
            values,
            talking_heads,
            output,
        })
    }

    /// `[B, Lq, Cq]` × `[B, Lk, Ckv]` → `[B, Lq, out_ch]`.
    pub fn forward<R>(
        &self,
        params: &AttentionParams,
        inputs_q: &Tensor,
        inputs_kv: &Tensor,
        is_training: bool,
        rng: &mut R,
    ) -> Result<Tensor, AttentionError>
    where
        R: Rng + ?Sized,
    {
        let layout = self.check_inputs(inputs_q, inputs_kv)?;
        let (split, merge) = self.projections(layout)?;
        log::trace!(
            "attention block forward q={:?} kv={:?} training={is_training}",
            inputs_q.dims(),
            inputs_kv.dims()
        );

        let policy = self.kernel.policy();
        let q = to_heads(&split.forward(&params.queries, inputs_q, policy)?)?;
        let k = to_heads(&split.forward(&params.keys, inputs_kv, policy)?)?;
        let v = to_heads(&split.forward(&params.values, inputs_kv, policy)?)?;

        let context = self.kernel.attend(
            &q,
            &k,
            &v,
            params.talking_heads.as_ref(),
            is_training,
            rng,
        )?;
        let context = context.transpose(1, 2)?.contiguous()?;
        let output = merge.forward(&params.output, &context, policy)?;
        Ok(self.out_dropout.forward(&output, is_training, rng)?)
    }

    /// Attention weights `[B, H, Lq, Lk]` as seen in evaluation mode.
    pub fn attention_weights(
        &self,
        params: &AttentionParams,
        inputs_q: &Tensor,
        inputs_kv: &Tensor,
    ) -> Result<Tensor, AttentionError> {
        let layout = self.check_inputs(inputs_q, inputs_kv)?;
        let (split, _) = self.projections(layout)?;
        let policy = self.kernel.policy();
        let q = to_heads(&split.forward(&params.queries, inputs_q, policy)?)?;
        let k = to_heads(&split.forward(&params.keys, inputs_kv, policy)?)?;
        self.kernel
            .attention_probs(&q, &k, params.talking_heads.as_ref())
    }

    fn check_inputs(
        &self,
        inputs_q: &Tensor,
        inputs_kv: &Tensor,
    ) -> Result<HeadLayout, AttentionError> {
        checks::expect_rank("attention.inputs_q", inputs_q, 3)?;
        checks::expect_rank("attention.inputs_kv", inputs_kv, 3)?;
        let (batch_q, _, in_ch) = inputs_q.dims3()?;
        let (batch_kv, kv_len, _) = inputs_kv.dims3()?;
        if batch_q != batch_kv {
            return Err(AttentionError::shape(format!(
                "inputs_q batch {batch_q} does not match inputs_kv batch {batch_kv}"
            )));
        }
        if kv_len == 0 {
            return Err(AttentionError::shape("inputs_kv has an empty sequence axis"));
        }
        self.config.resolve(in_ch)
    }

    fn projections(
        &self,
        layout: HeadLayout,
    ) -> Result<(DenseGeneral, DenseGeneral), AttentionError> {
        let split = DenseGeneral::new(
            GeneralLayout::ExpandLast {
                features: (layout.num_heads, layout.head_ch),
            },
            self.config.use_bias,
            self.config.kernel_init,
            self.config.bias_init,
        )?;
        let merge = DenseGeneral::new(
            GeneralLayout::ContractLastTwo {
                features: layout.out_ch,
            },
            self.config.use_bias,
            self.config.kernel_init,
            self.config.bias_init,
        )?;
        Ok((split, merge))
    }
}

/// `[B, L, H, D]` → `[B, H, L, D]`.
fn to_heads(projected: &Tensor) -> Result<Tensor, AttentionError> {
    Ok(projected.transpose(1, 2)?.contiguous()?)
}

/// Parameters of one [`SelfAttentionBlock`], scoped under `AttentionBlock_0`.
#[derive(Debug, Clone)]
pub struct SelfAttentionParams {
    pub attention: AttentionParams,
}

/// Attention of a sequence onto itself.
#[derive(Debug, Clone)]
pub struct SelfAttentionBlock {
    inner: AttentionBlock,
}

impl SelfAttentionBlock {
    pub fn new(config: AttentionConfig) -> Result<Self, AttentionError> {
        Ok(Self {
            inner: AttentionBlock::new(config)?,
        })
    }

    pub fn config(&self) -> &AttentionConfig {
        self.inner.config()
    }

    pub fn init(
        &self,
        channels: usize,
        vb: VarBuilder<'_>,
    ) -> Result<SelfAttentionParams, AttentionError> {
        let attention = self
            .inner
            .init(channels, channels, vb.pp("AttentionBlock_0"))?;
        Ok(SelfAttentionParams { attention })
    }

    /// `[B, L, C]` → `[B, L, out_ch]`.
    pub fn forward<R>(
        &self,
        params: &SelfAttentionParams,
        inputs: &Tensor,
        is_training: bool,
        rng: &mut R,
    ) -> Result<Tensor, AttentionError>
    where
        R: Rng + ?Sized,
    {
        self.inner
            .forward(&params.attention, inputs, inputs, is_training, rng)
    }

    pub fn attention_weights(
        &self,
        params: &SelfAttentionParams,
        inputs: &Tensor,
    ) -> Result<Tensor, AttentionError> {
        self.inner.attention_weights(&params.attention, inputs, inputs)
    }
}
