//! Tensor blocks - Images, keypoints and one-hot encodings.
//!
//! All tensor blocks carry a number of spatial dimensions `N`. Observations
//! are row-major `Tensor`s whose shape lists the spatial dimensions first and
//! the per-position feature dimension last:
//!
//! | Block | Observation shape |
//! |-------|-------------------|
//! | `ImageTensor{N}` | `[d1, .., dN, nchannels]` |
//! | `KeypointTensor{N}` | `[sz.., N]` |
//! | `OneHotTensor{N}` | `[d1, .., dN, nclasses]` |
//! | `OneHotTensorMulti{N}` | `[d1, .., dN, nclasses]` |
//!
//! `OneHotTensor{0}` is therefore a plain class vector, the model output
//! block of a classification task.

use crate::block::{downcast, Block, BlockKind};
use crate::block_config::BlockConfig;
use crate::blocks::{Label, LabelMulti};
use crate::check::{CheckFailure, CheckReport};
use crate::loss::LossFn;
use crate::obs::{Obs, Tensor};
use crate::{BlockwiseError, Result};
use rand::rngs::StdRng;
use rand::Rng;
use std::any::Any;

/// Spatial extent used for mock tensors.
const MOCK_SPATIAL: usize = 16;

/// Tolerance for one-hot row sums.
const ONEHOT_TOL: f32 = 1e-4;

fn wrong_type(name: String, expected: &str, obs: &Obs) -> CheckReport {
    CheckReport::fail(
        name,
        CheckFailure::WrongType {
            expected: expected.to_string(),
            found: obs.type_name().to_string(),
        },
    )
}

/// Check that `t` has `ndims + 1` dimensions, non-empty spatial extents and a
/// trailing dimension of `last`.
fn check_spatial_shape(t: &Tensor, ndims: usize, last: usize) -> Option<CheckFailure> {
    let shape = t.shape();
    let ok = shape.len() == ndims + 1
        && shape[..ndims].iter().all(|&d| d > 0)
        && shape[ndims] == last;
    if ok {
        None
    } else {
        Some(CheckFailure::WrongShape {
            expected: format!("{} spatial dims followed by {}", ndims, last),
            found: shape.to_vec(),
        })
    }
}

fn mock_shape(ndims: usize, last: usize) -> Vec<usize> {
    let mut shape = vec![MOCK_SPATIAL; ndims];
    shape.push(last);
    shape
}

/// An `N`-dimensional image with `nchannels` channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTensor {
    ndims: usize,
    nchannels: usize,
}

impl ImageTensor {
    pub fn new(ndims: usize, nchannels: usize) -> Self {
        Self { ndims, nchannels }
    }

    #[inline]
    pub fn nchannels(&self) -> usize {
        self.nchannels
    }
}

impl Block for ImageTensor {
    fn kind(&self) -> BlockKind {
        BlockKind::ImageTensor
    }

    fn type_name(&self) -> String {
        format!("ImageTensor{{{}}}({} channels)", self.ndims, self.nchannels)
    }

    fn ndims(&self) -> Option<usize> {
        Some(self.ndims)
    }

    fn diagnose(&self, obs: &Obs) -> CheckReport {
        let name = self.type_name();
        let Some(t) = obs.as_tensor() else {
            return wrong_type(name, "tensor", obs);
        };
        match check_spatial_shape(t, self.ndims, self.nchannels) {
            Some(failure) => CheckReport::fail(name, failure),
            None => CheckReport::pass(name),
        }
    }

    fn mock(&self, rng: &mut StdRng) -> Obs {
        Obs::Tensor(Tensor::rand(mock_shape(self.ndims, self.nchannels), rng))
    }

    fn to_config(&self) -> BlockConfig {
        BlockConfig::ImageTensor {
            ndims: self.ndims,
            nchannels: self.nchannels,
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `N`-dimensional keypoint coordinates; `sz` gives the keypoint layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeypointTensor {
    ndims: usize,
    sz: Vec<usize>,
}

impl KeypointTensor {
    pub fn new(ndims: usize, sz: Vec<usize>) -> Self {
        Self { ndims, sz }
    }

    #[inline]
    pub fn sz(&self) -> &[usize] {
        &self.sz
    }

    /// Number of scalar outputs needed to predict all keypoints.
    pub fn num_outputs(&self) -> usize {
        self.sz.iter().product::<usize>() * self.ndims
    }

    fn expected_shape(&self) -> Vec<usize> {
        let mut shape = self.sz.clone();
        shape.push(self.ndims);
        shape
    }
}

impl Block for KeypointTensor {
    fn kind(&self) -> BlockKind {
        BlockKind::KeypointTensor
    }

    fn type_name(&self) -> String {
        format!("KeypointTensor{{{}}}({:?})", self.ndims, self.sz)
    }

    fn ndims(&self) -> Option<usize> {
        Some(self.ndims)
    }

    fn diagnose(&self, obs: &Obs) -> CheckReport {
        let name = self.type_name();
        let Some(t) = obs.as_tensor() else {
            return wrong_type(name, "tensor", obs);
        };
        let expected = self.expected_shape();
        if t.shape() != expected.as_slice() {
            return CheckReport::fail(
                name,
                CheckFailure::WrongShape {
                    expected: format!("{:?}", expected),
                    found: t.shape().to_vec(),
                },
            );
        }
        CheckReport::pass(name)
    }

    fn mock(&self, rng: &mut StdRng) -> Obs {
        Obs::Tensor(Tensor::rand(self.expected_shape(), rng))
    }

    fn loss_fn(&self, y: &dyn Block) -> Result<LossFn> {
        let Some(y) = downcast::<KeypointTensor>(y) else {
            return Err(BlockwiseError::UnsupportedBlockCombination {
                input: self.type_name(),
                output: y.type_name(),
            });
        };
        if self.num_outputs() != y.num_outputs() || self.ndims != y.ndims {
            return Err(BlockwiseError::BlockSizeMismatch {
                expected: self.num_outputs(),
                actual: y.num_outputs(),
            });
        }
        Ok(LossFn::Mse)
    }

    fn to_config(&self) -> BlockConfig {
        BlockConfig::KeypointTensor {
            ndims: self.ndims,
            sz: self.sz.clone(),
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One-hot encoding of a single label per spatial position.
#[derive(Debug, Clone, PartialEq)]
pub struct OneHotTensor {
    ndims: usize,
    classes: Vec<Obs>,
}

impl OneHotTensor {
    pub fn new<I>(ndims: usize, classes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Obs>,
    {
        Self {
            ndims,
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    /// The model output block for predicting `label`.
    pub fn for_label(label: &Label) -> Self {
        Self::new(0, label.classes().to_vec())
    }

    #[inline]
    pub fn classes(&self) -> &[Obs] {
        &self.classes
    }

    /// Encode a single label as a one-hot class vector.
    pub fn encode(&self, value: &Obs) -> Result<Tensor> {
        let index = self.classes.iter().position(|c| c == value).ok_or_else(|| {
            BlockwiseError::BlockValidation {
                block: self.type_name(),
                reason: CheckFailure::NotInClasses {
                    value: value.to_string(),
                }
                .to_string(),
            }
        })?;
        let mut t = Tensor::zeros(vec![self.classes.len()]);
        t.data_mut()[index] = 1.0;
        Ok(t)
    }

    /// Decode the most likely class of a class vector.
    pub fn decode(&self, t: &Tensor) -> Result<Obs> {
        if self.classes.is_empty() {
            return Err(BlockwiseError::Shape(format!(
                "cannot decode with {}: it has no classes",
                self.type_name()
            )));
        }
        if t.shape() != [self.classes.len()] {
            return Err(BlockwiseError::Shape(format!(
                "expected class vector of length {}, got shape {:?}",
                self.classes.len(),
                t.shape()
            )));
        }
        let index = t
            .data()
            .iter()
            .enumerate()
            .fold(0, |best, (i, v)| if *v > t.data()[best] { i } else { best });
        Ok(self.classes[index].clone())
    }
}

impl Block for OneHotTensor {
    fn kind(&self) -> BlockKind {
        BlockKind::OneHotTensor
    }

    fn type_name(&self) -> String {
        format!("OneHotTensor{{{}}}({} classes)", self.ndims, self.classes.len())
    }

    fn ndims(&self) -> Option<usize> {
        Some(self.ndims)
    }

    fn diagnose(&self, obs: &Obs) -> CheckReport {
        let name = self.type_name();
        let Some(t) = obs.as_tensor() else {
            return wrong_type(name, "tensor", obs);
        };
        let nclasses = self.classes.len();
        if let Some(failure) = check_spatial_shape(t, self.ndims, nclasses) {
            return CheckReport::fail(name, failure);
        }
        if nclasses == 0 {
            return CheckReport::pass(name);
        }
        for (pos, row) in t.data().chunks(nclasses).enumerate() {
            if row.iter().any(|v| !(0.0..=1.0).contains(v)) {
                return CheckReport::fail(
                    name,
                    CheckFailure::InvalidValues(format!("position {} has values outside [0, 1]", pos)),
                );
            }
            let sum: f32 = row.iter().sum();
            if (sum - 1.0).abs() > ONEHOT_TOL {
                return CheckReport::fail(
                    name,
                    CheckFailure::InvalidValues(format!(
                        "position {} sums to {} instead of 1",
                        pos, sum
                    )),
                );
            }
        }
        CheckReport::pass(name)
    }

    fn mock(&self, rng: &mut StdRng) -> Obs {
        let nclasses = self.classes.len();
        let mut t = Tensor::zeros(mock_shape(self.ndims, nclasses));
        if nclasses > 0 {
            for row in t.data_mut().chunks_mut(nclasses) {
                row[rng.gen_range(0..nclasses)] = 1.0;
            }
        }
        Obs::Tensor(t)
    }

    fn loss_fn(&self, y: &dyn Block) -> Result<LossFn> {
        let nclasses = self.classes.len();
        let target = if let Some(y) = downcast::<OneHotTensor>(y) {
            (y.ndims == self.ndims).then(|| y.classes.len())
        } else if let Some(y) = downcast::<Label>(y) {
            (self.ndims == 0).then(|| y.classes().len())
        } else {
            None
        };
        match target {
            None => Err(BlockwiseError::UnsupportedBlockCombination {
                input: self.type_name(),
                output: y.type_name(),
            }),
            Some(n) if n != nclasses => Err(BlockwiseError::BlockSizeMismatch {
                expected: nclasses,
                actual: n,
            }),
            Some(_) => Ok(LossFn::LogitCrossEntropy),
        }
    }

    fn to_config(&self) -> BlockConfig {
        BlockConfig::OneHotTensor {
            ndims: self.ndims,
            classes: self.classes.clone(),
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Multi-hot encoding of a label set per spatial position.
#[derive(Debug, Clone, PartialEq)]
pub struct OneHotTensorMulti {
    ndims: usize,
    classes: Vec<Obs>,
}

impl OneHotTensorMulti {
    pub fn new<I>(ndims: usize, classes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Obs>,
    {
        Self {
            ndims,
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    /// The model output block for predicting `labels`.
    pub fn for_labels(labels: &LabelMulti) -> Self {
        Self::new(0, labels.classes().to_vec())
    }

    #[inline]
    pub fn classes(&self) -> &[Obs] {
        &self.classes
    }
}

impl Block for OneHotTensorMulti {
    fn kind(&self) -> BlockKind {
        BlockKind::OneHotTensorMulti
    }

    fn type_name(&self) -> String {
        format!(
            "OneHotTensorMulti{{{}}}({} classes)",
            self.ndims,
            self.classes.len()
        )
    }

    fn ndims(&self) -> Option<usize> {
        Some(self.ndims)
    }

    fn diagnose(&self, obs: &Obs) -> CheckReport {
        let name = self.type_name();
        let Some(t) = obs.as_tensor() else {
            return wrong_type(name, "tensor", obs);
        };
        if let Some(failure) = check_spatial_shape(t, self.ndims, self.classes.len()) {
            return CheckReport::fail(name, failure);
        }
        if t.data().iter().any(|v| !(0.0..=1.0).contains(v)) {
            return CheckReport::fail(
                name,
                CheckFailure::InvalidValues("values outside [0, 1]".to_string()),
            );
        }
        CheckReport::pass(name)
    }

    fn mock(&self, rng: &mut StdRng) -> Obs {
        let mut t = Tensor::zeros(mock_shape(self.ndims, self.classes.len()));
        for v in t.data_mut() {
            if rng.gen_bool(0.5) {
                *v = 1.0;
            }
        }
        Obs::Tensor(t)
    }

    fn loss_fn(&self, y: &dyn Block) -> Result<LossFn> {
        let nclasses = self.classes.len();
        let target = if let Some(y) = downcast::<OneHotTensorMulti>(y) {
            (y.ndims == self.ndims).then(|| y.classes.len())
        } else if let Some(y) = downcast::<LabelMulti>(y) {
            (self.ndims == 0).then(|| y.classes().len())
        } else {
            None
        };
        match target {
            None => Err(BlockwiseError::UnsupportedBlockCombination {
                input: self.type_name(),
                output: y.type_name(),
            }),
            Some(n) if n != nclasses => Err(BlockwiseError::BlockSizeMismatch {
                expected: nclasses,
                actual: n,
            }),
            Some(_) => Ok(LossFn::LogitBinaryCrossEntropy),
        }
    }

    fn to_config(&self) -> BlockConfig {
        BlockConfig::OneHotTensorMulti {
            ndims: self.ndims,
            classes: self.classes.clone(),
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
