//! Linear and generalized affine projections.
//!
//! Kernels are stored input-major: a [`Dense`] kernel is `(in, out)`, and a
//! [`DenseGeneral`] kernel keeps the split axes explicit, either
//! `(in, f1, f2)` when expanding the last axis or `(a, b, out)` when
//! contracting the last two. Forward passes flatten the leading axes, run a
//! single matmul in [`PrecisionPolicy::compute`], add the bias and restore the
//! leading layout before casting back to storage.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::{
    checks,
    dtypes::PrecisionPolicy,
    error::{LayerError, Result},
    init::{Fans, Initializer},
};

/// Learned kernel and optional bias of a projection.
#[derive(Debug, Clone)]
pub struct DenseParams {
    pub kernel: Tensor,
    pub bias: Option<Tensor>,
}

/// Affine projection over the trailing axis.
#[derive(Debug, Clone)]
pub struct Dense {
    features: usize,
    use_bias: bool,
    kernel_init: Initializer,
    bias_init: Initializer,
}

impl Dense {
    pub fn new(features: usize, use_bias: bool) -> Result<Self> {
        checks::expect_positive("dense.features", features)?;
        Ok(Self {
            features,
            use_bias,
            kernel_init: Initializer::default(),
            bias_init: Initializer::Zeros,
        })
    }

    pub fn with_kernel_init(mut self, init: Initializer) -> Self {
        self.kernel_init = init;
        self
    }

    pub fn with_bias_init(mut self, init: Initializer) -> Self {
        self.bias_init = init;
        self
    }

    /// Creates `kernel` `(in_features, features)` and, if enabled, `bias`.
    pub fn init(&self, in_features: usize, vb: VarBuilder<'_>) -> Result<DenseParams> {
        checks::expect_positive("dense.in_features", in_features)?;
        let kernel = self.kernel_init.create(
            &vb,
            (in_features, self.features),
            "kernel",
            Fans::new(in_features, self.features),
        )?;
        let bias = if self.use_bias {
            Some(
                self.bias_init
                    .create(&vb, self.features, "bias", Fans::vector(self.features))?,
            )
        } else {
            None
        };
        Ok(DenseParams { kernel, bias })
    }

    pub fn forward(
        &self,
        params: &DenseParams,
        input: &Tensor,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        checks::expect_min_rank("dense.input", input, 1)?;
        let in_features = params.kernel.dims()[0];
        checks::expect_last_dim("dense.input", input, in_features)?;
        project(input, 1, &params.kernel, params.bias.as_ref(), &[self.features], policy)
    }
}

/// How a [`DenseGeneral`] maps its input axes to output features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralLayout {
    /// `(..., in) -> (..., f1, f2)`, used to split channels into heads.
    ExpandLast { features: (usize, usize) },
    /// `(..., a, b) -> (..., out)`, used to merge heads back into channels.
    ContractLastTwo { features: usize },
}

/// Projection that reads or writes more than one trailing axis.
#[derive(Debug, Clone)]
pub struct DenseGeneral {
    layout: GeneralLayout,
    use_bias: bool,
    kernel_init: Initializer,
    bias_init: Initializer,
}

impl DenseGeneral {
    pub fn new(
        layout: GeneralLayout,
        use_bias: bool,
        kernel_init: Initializer,
        bias_init: Initializer,
    ) -> Result<Self> {
        match layout {
            GeneralLayout::ExpandLast { features: (f1, f2) } => {
                checks::expect_positive("dense_general.features.0", f1)?;
                checks::expect_positive("dense_general.features.1", f2)?;
            }
            GeneralLayout::ContractLastTwo { features } => {
                checks::expect_positive("dense_general.features", features)?;
            }
        }
        Ok(Self {
            layout,
            use_bias,
            kernel_init,
            bias_init,
        })
    }

    /// Creates the kernel for inputs whose trailing axes are `input_dims`.
    pub fn init(&self, input_dims: &[usize], vb: VarBuilder<'_>) -> Result<DenseParams> {
        let (kernel_shape, bias_shape, fans) = match (self.layout, input_dims) {
            (GeneralLayout::ExpandLast { features: (f1, f2) }, [.., in_features]) => (
                vec![*in_features, f1, f2],
                vec![f1, f2],
                Fans::new(*in_features, f1 * f2),
            ),
            (GeneralLayout::ContractLastTwo { features }, [.., a, b]) => (
                vec![*a, *b, features],
                vec![features],
                Fans::new(a * b, features),
            ),
            (layout, dims) => {
                return Err(LayerError::shape(
                    "dense_general.init",
                    format!("input dims {dims:?} incompatible with {layout:?}"),
                ))
            }
        };
        if fans.fan_in == 0 {
            return Err(LayerError::Configuration(
                "dense_general input features must be non-zero".into(),
            ));
        }
        let kernel = self.kernel_init.create(&vb, kernel_shape, "kernel", fans)?;
        let bias = if self.use_bias {
            let len = bias_shape.iter().product();
            Some(self.bias_init.create(&vb, bias_shape, "bias", Fans::vector(len))?)
        } else {
            None
        };
        Ok(DenseParams { kernel, bias })
    }

    pub fn forward(
        &self,
        params: &DenseParams,
        input: &Tensor,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        let kernel_dims = params.kernel.dims();
        match self.layout {
            GeneralLayout::ExpandLast { features: (f1, f2) } => {
                checks::expect_min_rank("dense_general.input", input, 1)?;
                checks::expect_last_dim("dense_general.input", input, kernel_dims[0])?;
                project(input, 1, &params.kernel, params.bias.as_ref(), &[f1, f2], policy)
            }
            GeneralLayout::ContractLastTwo { features } => {
                checks::expect_min_rank("dense_general.input", input, 2)?;
                let dims = input.dims();
                let trailing = &dims[dims.len() - 2..];
                if trailing != &kernel_dims[..2] {
                    return Err(LayerError::shape(
                        "dense_general.input",
                        format!(
                            "expected trailing axes {:?}, got shape {dims:?}",
                            &kernel_dims[..2]
                        ),
                    ));
                }
                project(input, 2, &params.kernel, params.bias.as_ref(), &[features], policy)
            }
        }
    }
}

/// Contracts the last `contracted` axes of `input` against the leading axes of
/// `kernel`, producing `(leading..., out_dims...)`.
fn project(
    input: &Tensor,
    contracted: usize,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    out_dims: &[usize],
    policy: &PrecisionPolicy,
) -> Result<Tensor> {
    let dims = input.dims();
    let split = dims.len() - contracted;
    let leading = &dims[..split];
    let rows: usize = leading.iter().product();
    let in_features: usize = dims[split..].iter().product();
    let out_features: usize = out_dims.iter().product();

    let flat = policy
        .cast_for_matmul(input)?
        .contiguous()?
        .reshape((rows, in_features))?;
    let kernel = policy
        .cast_for_matmul(kernel)?
        .reshape((in_features, out_features))?;
    let mut output = flat.matmul(&kernel)?;
    if let Some(bias) = bias {
        let bias = policy.cast_for_matmul(bias)?.reshape(out_features)?;
        output = output.broadcast_add(&bias)?;
    }

    let mut target = leading.to_vec();
    target.extend_from_slice(out_dims);
    Ok(policy.cast_to_storage(&output.reshape(target)?)?)
}
