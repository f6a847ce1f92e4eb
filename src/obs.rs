//! Observations - dynamically typed sample values checked against blocks.
//!
//! Blocks describe what an observation should look like; `Obs` is the value
//! being described. Keeping observations dynamically typed lets a block
//! distinguish "wrong type" from "wrong length" or "unknown class" when
//! reporting why a sample was rejected.

use crate::{BlockwiseError, Result};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dense `f32` buffer with a shape.
///
/// Image-like tensors store spatial dimensions first, followed by the
/// channel dimension (`[W, H, C]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, validating that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(BlockwiseError::Shape(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Create a zero-filled tensor.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Create a tensor with values drawn uniformly from `[0, 1)`.
    pub fn rand(shape: Vec<usize>, rng: &mut StdRng) -> Self {
        let len: usize = shape.iter().product();
        let data = (0..len).map(|_| rng.gen::<f32>()).collect();
        Self { shape, data }
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Number of dimensions.
    #[inline]
    pub fn ndims(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Obs {
    /// Missing value (e.g. an empty table cell)
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Ordered sequence of observations
    Seq(Vec<Obs>),
    Tensor(Tensor),
    /// Tabular row keyed by column name
    Row(BTreeMap<String, Obs>),
}

impl Obs {
    /// Short name of the observation's type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Obs::Missing => "missing",
            Obs::Bool(_) => "bool",
            Obs::Int(_) => "integer",
            Obs::Float(_) => "float",
            Obs::Text(_) => "text",
            Obs::Seq(_) => "sequence",
            Obs::Tensor(_) => "tensor",
            Obs::Row(_) => "row",
        }
    }

    /// Numeric value of an `Int` or `Float` observation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Obs::Int(v) => Some(*v as f64),
            Obs::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Obs::Int(_) | Obs::Float(_))
    }

    /// True for values that can serve as a categorical label.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Obs::Bool(_) | Obs::Int(_) | Obs::Float(_) | Obs::Text(_)
        )
    }

    pub fn as_seq(&self) -> Option<&[Obs]> {
        match self {
            Obs::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Obs::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_row(&self) -> Option<&BTreeMap<String, Obs>> {
        match self {
            Obs::Row(row) => Some(row),
            _ => None,
        }
    }
}

impl fmt::Display for Obs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obs::Missing => write!(f, "missing"),
            Obs::Bool(v) => write!(f, "{}", v),
            Obs::Int(v) => write!(f, "{}", v),
            Obs::Float(v) => write!(f, "{}", v),
            Obs::Text(v) => write!(f, "{:?}", v),
            Obs::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Obs::Tensor(t) => write!(f, "tensor{:?}", t.shape()),
            Obs::Row(row) => write!(f, "row({} columns)", row.len()),
        }
    }
}

impl From<bool> for Obs {
    fn from(v: bool) -> Self {
        Obs::Bool(v)
    }
}

impl From<i64> for Obs {
    fn from(v: i64) -> Self {
        Obs::Int(v)
    }
}

impl From<i32> for Obs {
    fn from(v: i32) -> Self {
        Obs::Int(i64::from(v))
    }
}

impl From<f64> for Obs {
    fn from(v: f64) -> Self {
        Obs::Float(v)
    }
}

impl From<f32> for Obs {
    fn from(v: f32) -> Self {
        Obs::Float(f64::from(v))
    }
}

impl From<&str> for Obs {
    fn from(v: &str) -> Self {
        Obs::Text(v.to_string())
    }
}

impl From<String> for Obs {
    fn from(v: String) -> Self {
        Obs::Text(v)
    }
}

impl From<Tensor> for Obs {
    fn from(t: Tensor) -> Self {
        Obs::Tensor(t)
    }
}

impl<T: Into<Obs>> From<Vec<T>> for Obs {
    fn from(items: Vec<T>) -> Self {
        Obs::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Obs>> for Obs {
    fn from(row: BTreeMap<String, Obs>) -> Self {
        Obs::Row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_tensor_shape_validation() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_tensor_rand_deterministic() {
        let mut rng1 = StdRng::seed_from_u64(7);
        let mut rng2 = StdRng::seed_from_u64(7);
        let a = Tensor::rand(vec![4, 4, 3], &mut rng1);
        let b = Tensor::rand(vec![4, 4, 3], &mut rng2);
        assert_eq!(a, b);
        assert_eq!(a.ndims(), 3);
        assert_eq!(a.len(), 48);
    }

    #[test]
    fn test_obs_conversions() {
        assert_eq!(Obs::from("cat"), Obs::Text("cat".to_string()));
        assert_eq!(Obs::from(vec![1, 2]), Obs::Seq(vec![Obs::Int(1), Obs::Int(2)]));
        assert_eq!(Obs::from(2.5).as_f64(), Some(2.5));
        assert!(Obs::from(3).is_numeric());
        assert!(!Obs::from("3").is_numeric());
    }

    #[test]
    fn test_obs_display() {
        let obs = Obs::from(vec!["cat", "dog"]);
        assert_eq!(obs.to_string(), "[\"cat\", \"dog\"]");
    }
}
