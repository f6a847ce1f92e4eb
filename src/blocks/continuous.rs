//! Continuous - Fixed-length numeric vectors.
//!
//! # Examples
//!
//! ```
//! use blockwise::blocks::Continuous;
//! use blockwise::{Block, Obs, Setup};
//!
//! let block = Continuous::new(5);
//! assert!(block.check(&Obs::from(vec![0, 0, 0, 0, 0])));
//! assert!(!block.check(&Obs::from(vec![5])));
//!
//! // Infer the size from data
//! let block = Continuous::setup(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
//! assert_eq!(block.size(), 2);
//! ```

use crate::block::{downcast, Block, BlockKind, Setup};
use crate::block_config::BlockConfig;
use crate::check::{CheckFailure, CheckReport};
use crate::loss::LossFn;
use crate::obs::{Obs, Tensor};
use crate::{BlockwiseError, Result};
use rand::rngs::StdRng;
use std::any::Any;

/// A numeric vector of length `size`.
///
/// Valid observations are `Seq`s of `Int`/`Float` values or one-dimensional
/// tensors, in both cases of exactly `size` elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuous {
    size: usize,
}

impl Continuous {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Block for Continuous {
    fn kind(&self) -> BlockKind {
        BlockKind::Continuous
    }

    fn type_name(&self) -> String {
        format!("Continuous({})", self.size)
    }

    fn diagnose(&self, obs: &Obs) -> CheckReport {
        let name = self.type_name();
        match obs {
            Obs::Seq(items) => {
                if let Some((index, item)) = items.iter().enumerate().find(|(_, o)| !o.is_numeric()) {
                    return CheckReport::fail(
                        name,
                        CheckFailure::WrongElementType {
                            index,
                            expected: "number".to_string(),
                            found: item.type_name().to_string(),
                        },
                    );
                }
                if items.len() != self.size {
                    return CheckReport::fail(
                        name,
                        CheckFailure::WrongLength {
                            expected: self.size,
                            found: items.len(),
                        },
                    );
                }
                CheckReport::pass(name)
            }
            Obs::Tensor(t) => {
                if t.ndims() != 1 {
                    return CheckReport::fail(
                        name,
                        CheckFailure::WrongShape {
                            expected: format!("[{}]", self.size),
                            found: t.shape().to_vec(),
                        },
                    );
                }
                if t.len() != self.size {
                    return CheckReport::fail(
                        name,
                        CheckFailure::WrongLength {
                            expected: self.size,
                            found: t.len(),
                        },
                    );
                }
                CheckReport::pass(name)
            }
            other => CheckReport::fail(
                name,
                CheckFailure::WrongType {
                    expected: "numeric sequence".to_string(),
                    found: other.type_name().to_string(),
                },
            ),
        }
    }

    fn mock(&self, rng: &mut StdRng) -> Obs {
        Obs::Tensor(Tensor::rand(vec![self.size], rng))
    }

    fn loss_fn(&self, y: &dyn Block) -> Result<LossFn> {
        let Some(y) = downcast::<Continuous>(y) else {
            return Err(BlockwiseError::UnsupportedBlockCombination {
                input: self.type_name(),
                output: y.type_name(),
            });
        };
        if self.size != y.size {
            return Err(BlockwiseError::BlockSizeMismatch {
                expected: self.size,
                actual: y.size,
            });
        }
        Ok(LossFn::Mse)
    }

    fn to_config(&self) -> BlockConfig {
        BlockConfig::Continuous { size: self.size }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Setup for Continuous {
    /// Infer `size` from the first observation; every observation must agree.
    fn setup<I>(data: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Obs>,
    {
        let mut size = None;
        for (i, obs) in data.into_iter().enumerate() {
            let obs = obs.into();
            let len = match &obs {
                Obs::Seq(items) => items.len(),
                Obs::Tensor(t) if t.ndims() == 1 => t.len(),
                other => {
                    return Err(BlockwiseError::InvalidParameter(format!(
                        "observation {} is a {}, expected a numeric sequence",
                        i,
                        other.type_name()
                    )))
                }
            };
            match size {
                None => size = Some(len),
                Some(expected) if expected != len => {
                    return Err(BlockwiseError::BlockSizeMismatch {
                        expected,
                        actual: len,
                    })
                }
                Some(_) => {}
            }
        }
        let size = size.ok_or_else(|| {
            BlockwiseError::InvalidParameter("cannot set up Continuous from empty data".to_string())
        })?;
        let block = Continuous::new(size);
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_check_sequences() {
        let block = Continuous::new(5);
        assert!(block.check(&Obs::from(vec![0, 0, 0, 0, 0])));
        assert!(block.check(&Obs::from(vec![0.5, 1.0, 2.0, 3.0, 4.0])));
        assert!(!block.check(&Obs::from(vec![5])));
        assert!(!block.check(&Obs::from("hi")));
    }

    #[test]
    fn test_diagnose_distinguishes_failures() {
        let block = Continuous::new(2);

        let report = block.diagnose(&Obs::from("hi"));
        assert!(matches!(report.failure, Some(CheckFailure::WrongType { .. })));

        let report = block.diagnose(&Obs::from(vec![1.0]));
        assert_eq!(
            report.failure,
            Some(CheckFailure::WrongLength { expected: 2, found: 1 })
        );

        let report = block.diagnose(&Obs::from(vec!["a", "b"]));
        assert!(matches!(
            report.failure,
            Some(CheckFailure::WrongElementType { index: 0, .. })
        ));
    }

    #[test]
    fn test_check_tensor() {
        let block = Continuous::new(3);
        assert!(block.check(&Obs::from(Tensor::zeros(vec![3]))));
        assert!(!block.check(&Obs::from(Tensor::zeros(vec![3, 1]))));
        assert!(!block.check(&Obs::from(Tensor::zeros(vec![4]))));
    }

    #[test]
    fn test_mock_is_valid() {
        let mut rng = StdRng::seed_from_u64(0);
        for size in [0, 1, 7, 64] {
            let block = Continuous::new(size);
            assert!(block.check(&block.mock(&mut rng)));
        }
    }

    #[test]
    fn test_setup() {
        let block = Continuous::setup(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        assert_eq!(block, Continuous::new(3));

        let ragged = Continuous::setup(vec![vec![1, 2, 3], vec![4]]);
        assert!(matches!(ragged, Err(BlockwiseError::BlockSizeMismatch { .. })));

        let empty: Vec<Vec<i32>> = vec![];
        assert!(Continuous::setup(empty).is_err());
    }

    #[test]
    fn test_loss_fn() {
        let out = Continuous::new(5);
        assert_eq!(out.loss_fn(&Continuous::new(5)).unwrap(), LossFn::Mse);
        assert!(matches!(
            out.loss_fn(&Continuous::new(3)),
            Err(BlockwiseError::BlockSizeMismatch { expected: 5, actual: 3 })
        ));
    }
}
