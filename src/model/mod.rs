//! Model description layer.
//!
//! Numerical execution of models belongs to the deep-learning runtime. This
//! module describes models structurally: which parameters they own and what
//! output shape a given input shape produces. That is all model construction
//! and fine-tuning need in order to size heads and partition parameters.
//!
//! Shapes follow the spatial-first convention `[d1, .., dN, channels, batch]`
//! for image-like inputs and `[features, batch]` for dense inputs.
//!
//! # Examples
//!
//! ```
//! use blockwise::model::{forward_shape, Activation, Dense, Module, Sequential};
//!
//! let model = Sequential::new(vec![
//!     Box::new(Dense::new(10, 32)),
//!     Box::new(Activation::relu()),
//!     Box::new(Dense::new(32, 2)),
//! ]);
//! assert_eq!(forward_shape(&model, &[10, 1]).unwrap(), vec![2, 1]);
//! assert_eq!(model.parameters().len(), 4);
//! ```

pub mod layers;

pub use layers::{
    Activation, ActivationKind, AdaptiveMeanPool, BatchNorm, Conv, Dense, Dropout, Embedding,
    Flatten, TabularEmbeddings, TabularModel, UNet,
};

use crate::{BlockwiseError, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier of a model parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamId(u64);

impl ParamId {
    /// Create a new unique ParamId.
    ///
    /// Uses an atomic counter to ensure uniqueness across the entire program.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        ParamId(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Create a ParamId from a raw value (for testing).
    #[doc(hidden)]
    pub fn from_raw(id: u64) -> Self {
        ParamId(id)
    }
}

impl Default for ParamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param#{}", self.0)
    }
}

/// A parameter array owned by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub id: ParamId,
    pub shape: Vec<usize>,
    /// Non-trainable parameters (e.g. running statistics) are never grouped
    pub trainable: bool,
}

impl Param {
    pub fn trainable(shape: Vec<usize>) -> Self {
        Self {
            id: ParamId::new(),
            shape,
            trainable: true,
        }
    }

    pub fn buffer(shape: Vec<usize>) -> Self {
        Self {
            id: ParamId::new(),
            shape,
            trainable: false,
        }
    }

    /// Number of scalar values.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Structural description of a model or layer.
pub trait Module: fmt::Debug + Send + Sync {
    /// Short layer name, e.g. `Dense(10 => 2)`.
    fn name(&self) -> String;

    /// All parameters, in layer order.
    fn parameters(&self) -> Vec<Param>;

    /// Output shape produced for an input of shape `input`.
    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>>;

    /// View as a plain sequential stack, if the module is one.
    fn as_sequential(&self) -> Option<&Sequential> {
        None
    }

    /// Get reference as Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Trainable parameters of `model`, in layer order.
pub fn trainable_parameters(model: &dyn Module) -> Vec<Param> {
    model
        .parameters()
        .into_iter()
        .filter(|p| p.trainable)
        .collect()
}

/// Infer the output shape of `model` for `input_shape` without running it.
pub fn forward_shape(model: &dyn Module, input_shape: &[usize]) -> Result<Vec<usize>> {
    model.output_shape(input_shape)
}

/// Leading (feature) dimension of `model`'s output for `input_shape`.
pub fn feature_width(model: &dyn Module, input_shape: &[usize]) -> Result<usize> {
    model
        .output_shape(input_shape)?
        .first()
        .copied()
        .ok_or_else(|| {
            BlockwiseError::Shape(format!(
                "{}: empty output shape for input {:?}",
                model.name(),
                input_shape
            ))
        })
}

/// Layers applied one after another.
#[derive(Debug, Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Module>>) -> Self {
        Self { layers }
    }

    pub fn push(&mut self, layer: Box<dyn Module>) {
        self.layers.push(layer);
    }

    #[inline]
    pub fn layers(&self) -> &[Box<dyn Module>] {
        &self.layers
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn name(&self) -> String {
        format!("Sequential({} layers)", self.layers.len())
    }

    fn parameters(&self) -> Vec<Param> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let mut shape = input.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            shape = layer.output_shape(&shape).map_err(|e| {
                BlockwiseError::Shape(format!("layer {} ({}): {}", i, layer.name(), e))
            })?;
        }
        Ok(shape)
    }

    fn as_sequential(&self) -> Option<&Sequential> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_param_ids() {
        let a = ParamId::new();
        let b = ParamId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_sequential_shape_and_params() {
        let model = Sequential::new(vec![
            Box::new(Conv::new(vec![3, 3], 3, 16)),
            Box::new(BatchNorm::new(16)),
            Box::new(Activation::relu()),
            Box::new(AdaptiveMeanPool),
            Box::new(Flatten),
            Box::new(Dense::new(16, 4)),
        ]);
        assert_eq!(forward_shape(&model, &[32, 32, 3, 1]).unwrap(), vec![4, 1]);
        // conv w+b, bn gamma+beta+mean+var, dense w+b
        assert_eq!(model.parameters().len(), 8);
        assert_eq!(trainable_parameters(&model).len(), 6);
    }

    #[test]
    fn test_sequential_reports_failing_layer() {
        let model = Sequential::new(vec![Box::new(Dense::new(4, 2)), Box::new(Dense::new(3, 1))]);
        let err = forward_shape(&model, &[4, 1]).unwrap_err();
        assert!(err.to_string().contains("layer 1"));
    }
}
