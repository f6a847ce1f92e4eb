//! Block trait system - Core trait for all data block descriptors.
//!
//! A block is an immutable description of what an observation looks like:
//! a fixed-length vector, a categorical label, an image with some number of
//! channels, a table row. Blocks are used to validate observations,
//! synthesize mock data, pick a loss function and choose a model
//! architecture for an input/output pair.
//!
//! # Capabilities
//!
//! - `diagnose()` / `check()` - Membership test with a structured explanation
//! - `mock()` - Synthesize an observation that passes `check()`
//! - `loss_fn()` - Loss for a model output block against a target block
//! - `to_config()` - Serializable constructor parameters
//!
//! For every block, `block.check(&block.mock(rng))` holds.
//!
//! # Examples
//!
//! ```
//! use blockwise::{Block, Obs};
//! use blockwise::blocks::Continuous;
//! use rand::SeedableRng;
//!
//! let block = Continuous::new(5);
//! assert!(block.check(&Obs::from(vec![0, 0, 0, 0, 0])));
//! assert!(!block.check(&Obs::from("hi")));
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let sample = block.mock(&mut rng);
//! assert!(block.check(&sample));
//! ```

use crate::block_config::BlockConfig;
use crate::check::CheckReport;
use crate::loss::LossFn;
use crate::obs::Obs;
use crate::{BlockwiseError, Result};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Tag identifying the variant of a block.
///
/// Model construction dispatches on pairs of these tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockKind {
    Continuous,
    Label,
    LabelMulti,
    ImageTensor,
    KeypointTensor,
    OneHotTensor,
    OneHotTensorMulti,
    TableRow,
    Wrapper,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Core trait for all block descriptors.
pub trait Block: fmt::Debug + Send + Sync {
    /// Variant tag of this block.
    fn kind(&self) -> BlockKind;

    /// Human-readable description including parameters, e.g. `Continuous(5)`.
    fn type_name(&self) -> String;

    /// Number of spatial dimensions for tensor-like blocks.
    ///
    /// `Some(0)` for per-sample encodings such as a one-hot class vector,
    /// `None` for blocks without a dimensionality.
    fn ndims(&self) -> Option<usize> {
        None
    }

    /// Check an observation and explain the outcome.
    fn diagnose(&self, obs: &Obs) -> CheckReport;

    /// Membership test: is `obs` a valid instance of this block?
    fn check(&self, obs: &Obs) -> bool {
        self.diagnose(obs).passed()
    }

    /// Like `check()`, but returns a `BlockValidation` error on failure.
    fn validate(&self, obs: &Obs) -> Result<()> {
        let report = self.diagnose(obs);
        match report.failure {
            None => Ok(()),
            Some(failure) => Err(BlockwiseError::BlockValidation {
                block: report.block,
                reason: failure.to_string(),
            }),
        }
    }

    /// Synthesize a valid observation.
    fn mock(&self, rng: &mut StdRng) -> Obs;

    /// Loss function comparing model outputs of this block with targets of `y`.
    ///
    /// Default implementation reports the pair as unsupported.
    fn loss_fn(&self, y: &dyn Block) -> Result<LossFn> {
        Err(BlockwiseError::UnsupportedBlockCombination {
            input: self.type_name(),
            output: y.type_name(),
        })
    }

    /// Inner block for decorating blocks.
    fn wrapped(&self) -> Option<&dyn Block> {
        None
    }

    /// Export constructor parameters.
    fn to_config(&self) -> BlockConfig;

    /// Clone into a new box.
    fn box_clone(&self) -> Box<dyn Block>;

    /// Get reference as Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Block> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Downcast a block trait object to a concrete block type.
pub fn downcast<T: Block + 'static>(block: &dyn Block) -> Option<&T> {
    block.as_any().downcast_ref::<T>()
}

/// Strip all decorating wrappers from a block.
pub fn unwrap_block(block: &dyn Block) -> &dyn Block {
    let mut current = block;
    while let Some(inner) = current.wrapped() {
        current = inner;
    }
    current
}

/// Blocks whose parameters can be inferred by scanning data once.
pub trait Setup: Sized {
    /// Build the block from an iterable of observations.
    fn setup<I>(data: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Obs>;
}

/// Membership test: is `obs` a valid instance of `block`?
pub fn checkblock(block: &dyn Block, obs: &Obs) -> bool {
    block.check(obs)
}

/// Synthesize a valid observation of `block`.
pub fn mockblock(block: &dyn Block, rng: &mut StdRng) -> Obs {
    block.mock(rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{Continuous, Label, WrapperBlock};
    use rand::SeedableRng;

    #[test]
    fn test_validate_reports_block_and_reason() {
        let block = Continuous::new(3);
        let err = block.validate(&Obs::from("hi")).unwrap_err();
        match err {
            BlockwiseError::BlockValidation { block, reason } => {
                assert_eq!(block, "Continuous(3)");
                assert!(reason.contains("wrong type"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_downcast() {
        let block: Box<dyn Block> = Box::new(Continuous::new(4));
        assert_eq!(downcast::<Continuous>(&*block).unwrap().size(), 4);
        assert!(downcast::<Label>(&*block).is_none());
    }

    #[test]
    fn test_unwrap_block() {
        let inner = Continuous::new(2);
        let wrapped = WrapperBlock::new("scaled", WrapperBlock::new("clipped", inner));
        let base = unwrap_block(&wrapped);
        assert_eq!(base.kind(), BlockKind::Continuous);
    }

    #[test]
    fn test_free_functions() {
        let block = Continuous::new(2);
        let mut rng = StdRng::seed_from_u64(1);
        let obs = mockblock(&block, &mut rng);
        assert!(checkblock(&block, &obs));
    }

    #[test]
    fn test_boxed_clone() {
        let block: Box<dyn Block> = Box::new(Continuous::new(4));
        let copy = block.clone();
        assert_eq!(copy.type_name(), "Continuous(4)");
    }
}
