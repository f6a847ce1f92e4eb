//! WrapperBlock - Named decorator around another block.

use crate::block::{Block, BlockKind};
use crate::block_config::BlockConfig;
use crate::check::CheckReport;
use crate::loss::LossFn;
use crate::obs::Obs;
use crate::Result;
use rand::rngs::StdRng;
use std::any::Any;

/// Decorates an inner block with a name, e.g. to tag a block whose
/// observations pass through a stateful transform.
///
/// All capabilities are forwarded to the inner block. Model construction
/// unwraps the decorator when no builder is registered for the wrapper
/// itself.
///
/// # Examples
///
/// ```
/// use blockwise::blocks::{Continuous, WrapperBlock};
/// use blockwise::{Block, BlockKind, Obs};
///
/// let block = WrapperBlock::new("normalized", Continuous::new(2));
/// assert_eq!(block.kind(), BlockKind::Wrapper);
/// assert!(block.check(&Obs::from(vec![0.1, 0.2])));
/// ```
#[derive(Debug, Clone)]
pub struct WrapperBlock {
    name: String,
    inner: Box<dyn Block>,
}

impl WrapperBlock {
    pub fn new(name: impl Into<String>, inner: impl Block + 'static) -> Self {
        Self::from_boxed(name, Box::new(inner))
    }

    pub fn from_boxed(name: impl Into<String>, inner: Box<dyn Block>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &dyn Block {
        &*self.inner
    }
}

impl Block for WrapperBlock {
    fn kind(&self) -> BlockKind {
        BlockKind::Wrapper
    }

    fn type_name(&self) -> String {
        format!("{}[{}]", self.name, self.inner.type_name())
    }

    fn ndims(&self) -> Option<usize> {
        self.inner.ndims()
    }

    fn diagnose(&self, obs: &Obs) -> CheckReport {
        let mut report = self.inner.diagnose(obs);
        report.block = self.type_name();
        report
    }

    fn mock(&self, rng: &mut StdRng) -> Obs {
        self.inner.mock(rng)
    }

    fn loss_fn(&self, y: &dyn Block) -> Result<LossFn> {
        self.inner.loss_fn(y)
    }

    fn wrapped(&self) -> Option<&dyn Block> {
        Some(&*self.inner)
    }

    fn to_config(&self) -> BlockConfig {
        BlockConfig::Wrapper {
            name: self.name.clone(),
            inner: Box::new(self.inner.to_config()),
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
