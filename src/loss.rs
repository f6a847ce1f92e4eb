//! Loss functions selected from block pairs.

use crate::block::{unwrap_block, Block};
use crate::{BlockwiseError, Result};
use serde::{Deserialize, Serialize};

/// Loss function comparing model outputs with encoded targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossFn {
    /// Mean squared error
    Mse,
    /// Softmax cross-entropy on logits, one-hot targets
    LogitCrossEntropy,
    /// Sigmoid binary cross-entropy on logits, multi-hot targets
    LogitBinaryCrossEntropy,
}

impl LossFn {
    /// Mean loss of `yhat` against `y`.
    ///
    /// Cross-entropy losses treat the last `nclasses` values of every
    /// position as one class vector; pass `nclasses = y.len()` for a single
    /// sample.
    pub fn evaluate(&self, yhat: &[f32], y: &[f32], nclasses: usize) -> Result<f64> {
        if yhat.len() != y.len() {
            return Err(BlockwiseError::BlockSizeMismatch {
                expected: yhat.len(),
                actual: y.len(),
            });
        }
        if yhat.is_empty() {
            return Ok(0.0);
        }

        match self {
            LossFn::Mse => {
                let sum: f64 = yhat
                    .iter()
                    .zip(y)
                    .map(|(a, b)| {
                        let d = f64::from(*a) - f64::from(*b);
                        d * d
                    })
                    .sum();
                Ok(sum / yhat.len() as f64)
            }
            LossFn::LogitCrossEntropy => {
                if nclasses == 0 || yhat.len() % nclasses != 0 {
                    return Err(BlockwiseError::InvalidParameter(format!(
                        "{} values cannot be split into class vectors of length {}",
                        yhat.len(),
                        nclasses
                    )));
                }
                let mut total = 0.0;
                for (logits, target) in yhat.chunks(nclasses).zip(y.chunks(nclasses)) {
                    let max = logits.iter().fold(f32::NEG_INFINITY, |m, v| m.max(*v));
                    let logsumexp = f64::from(max)
                        + logits
                            .iter()
                            .map(|v| (f64::from(*v) - f64::from(max)).exp())
                            .sum::<f64>()
                            .ln();
                    total += logits
                        .iter()
                        .zip(target)
                        .map(|(l, t)| -f64::from(*t) * (f64::from(*l) - logsumexp))
                        .sum::<f64>();
                }
                Ok(total / (yhat.len() / nclasses) as f64)
            }
            LossFn::LogitBinaryCrossEntropy => {
                let sum: f64 = yhat
                    .iter()
                    .zip(y)
                    .map(|(l, t)| {
                        let l = f64::from(*l);
                        let t = f64::from(*t);
                        // log(1 + exp(-|l|)) keeps large logits finite
                        l.max(0.0) - l * t + (-l.abs()).exp().ln_1p()
                    })
                    .sum();
                Ok(sum / yhat.len() as f64)
            }
        }
    }
}

/// Loss function for model outputs of `outblock` against targets of `yblock`.
///
/// Decorating wrappers on either side are stripped first.
pub fn blocklossfn(outblock: &dyn Block, yblock: &dyn Block) -> Result<LossFn> {
    unwrap_block(outblock).loss_fn(unwrap_block(yblock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{Continuous, Label, OneHotTensor, WrapperBlock};
    use approx::assert_relative_eq;

    #[test]
    fn test_mse() {
        let loss = LossFn::Mse.evaluate(&[1.0, 2.0], &[0.0, 4.0], 2).unwrap();
        assert_relative_eq!(loss, 2.5);
    }

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let loss = LossFn::LogitCrossEntropy
            .evaluate(&[0.0, 0.0, 0.0, 0.0], &[0.0, 1.0, 0.0, 0.0], 4)
            .unwrap();
        assert_relative_eq!(loss, 4.0f64.ln(), epsilon = 1e-9);
    }

    #[test]
    fn test_binary_cross_entropy_zero_logit() {
        let loss = LossFn::LogitBinaryCrossEntropy
            .evaluate(&[0.0, 0.0], &[1.0, 0.0], 2)
            .unwrap();
        assert_relative_eq!(loss, 2.0f64.ln(), epsilon = 1e-9);
    }

    #[test]
    fn test_evaluate_size_mismatch() {
        assert!(matches!(
            LossFn::Mse.evaluate(&[1.0], &[1.0, 2.0], 1),
            Err(BlockwiseError::BlockSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_blocklossfn() {
        assert_eq!(
            blocklossfn(&Continuous::new(5), &Continuous::new(5)).unwrap(),
            LossFn::Mse
        );
        assert!(matches!(
            blocklossfn(&Continuous::new(5), &Continuous::new(3)),
            Err(BlockwiseError::BlockSizeMismatch { expected: 5, actual: 3 })
        ));
        assert!(matches!(
            blocklossfn(&Continuous::new(2), &Label::new(["a", "b"])),
            Err(BlockwiseError::UnsupportedBlockCombination { .. })
        ));

        let y = WrapperBlock::new("named", Label::new(["a", "b"]));
        assert_eq!(
            blocklossfn(&OneHotTensor::new(0, ["a", "b"]), &y).unwrap(),
            LossFn::LogitCrossEntropy
        );
    }
}
