//! Explicit parameter ownership for the two-phase module lifecycle.
//!
//! Modules never create parameters during a forward pass. Instead a caller runs
//! the initialisation phase once through [`ParameterSet::initialize`], which
//! hands a [`VarBuilder`] to the module's `init` function. The resulting set
//! owns both the flat name → variable registry (the weight-compatibility
//! surface) and the typed parameter tree that forward functions borrow.
//!
//! Typed trees hold tensors that share storage with the registry, so
//! [`ParameterSet::set`] is visible through [`ParameterSet::params`] without
//! rebuilding anything.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::error::{LayerError, Result};

/// Named parameter registry plus the typed tree consumed by forward passes.
#[derive(Clone)]
pub struct ParameterSet<P> {
    varmap: VarMap,
    params: P,
}

impl<P> ParameterSet<P> {
    /// Runs `init` against a fresh registry and captures everything it creates.
    pub fn initialize<E, F>(dtype: DType, device: &Device, init: F) -> std::result::Result<Self, E>
    where
        F: FnOnce(VarBuilder<'_>) -> std::result::Result<P, E>,
    {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);
        let params = init(vb)?;
        Ok(Self { varmap, params })
    }

    /// Typed parameter tree for forward evaluation.
    pub fn params(&self) -> &P {
        &self.params
    }

    /// All parameters sorted by their hierarchical name.
    pub fn named_parameters(&self) -> Result<Vec<(String, Tensor)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("parameter registry lock poisoned".into()))?;
        let mut named: Vec<(String, Tensor)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(named)
    }

    /// Looks up a single parameter by name.
    pub fn get(&self, name: &str) -> Result<Option<Tensor>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("parameter registry lock poisoned".into()))?;
        Ok(data.get(name).map(|var| var.as_tensor().clone()))
    }

    /// Overwrites the value of an existing parameter; the shape must match.
    pub fn set(&mut self, name: &str, value: &Tensor) -> Result<()> {
        let existing = self.get(name)?.ok_or_else(|| {
            LayerError::Configuration(format!("unknown parameter `{name}`"))
        })?;
        if existing.dims() != value.dims() {
            return Err(LayerError::Shape {
                context: "parameter.set",
                message: format!(
                    "`{name}` expects shape {:?}, got {:?}",
                    existing.dims(),
                    value.dims()
                ),
            });
        }
        let value = value.to_dtype(existing.dtype())?;
        self.varmap.set_one(name, &value)?;
        Ok(())
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> Result<usize> {
        Ok(self
            .named_parameters()?
            .iter()
            .map(|(_, tensor)| tensor.elem_count())
            .sum())
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for ParameterSet<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterSet")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
