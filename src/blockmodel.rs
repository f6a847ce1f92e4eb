//! Model construction dispatch.
//!
//! `blockmodel(inblock, outblock, backbone, options)` builds a model that
//! maps observations of `inblock` to outputs of `outblock`. Which
//! architecture is built depends on the runtime kinds of both blocks, so
//! construction is driven by a registry keyed by `(BlockKind, BlockKind)`
//! pairs. Each key holds a list of rules guarded by a `DimRule` on the
//! blocks' dimensionality; the most recently registered matching rule wins,
//! so new combinations and overrides are added without touching existing
//! rules.
//!
//! # Default Combinations
//!
//! | Input | Output | Model |
//! |-------|--------|-------|
//! | `ImageTensor{N}` | `OneHotTensor{0}`, `OneHotTensorMulti{0}` | backbone + classification head |
//! | `ImageTensor{N}` | `OneHotTensor{N}` | U-Net around backbone |
//! | `ImageTensor{N}` | `KeypointTensor{N}` | backbone + regression head |
//! | `TableRow` | `Continuous`, `OneHotTensor{0}` | tabular model |
//!
//! # Examples
//!
//! ```
//! use blockwise::blocks::{ImageTensor, OneHotTensor};
//! use blockwise::model::{Conv, Module};
//! use blockwise::{blockmodel, BlockModelOptions};
//!
//! let backbone = Box::new(Conv::new(vec![3, 3], 3, 32));
//! let model = blockmodel(
//!     &ImageTensor::new(2, 3),
//!     &OneHotTensor::new(0, ["cat", "dog"]),
//!     Some(backbone),
//!     BlockModelOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(model.output_shape(&[64, 64, 3, 1]).unwrap(), vec![2, 1]);
//! ```

use crate::architectures::{ArchitectureFactory, DefaultArchitectures};
use crate::block::{downcast, Block, BlockKind};
use crate::blocks::{Continuous, ImageTensor, KeypointTensor, OneHotTensor, OneHotTensorMulti, TableRow};
use crate::model::{feature_width, Module, Sequential, TabularModel};
use crate::{BlockwiseError, Result};
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Default spatial size used to probe backbones and size U-Nets.
pub const DEFAULT_PROBE_SIZE: usize = 256;

/// Sub-backbones of a tabular model that callers may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabularPart {
    /// Embeddings for categorical columns
    Categorical,
    /// Backbone for continuous columns
    Continuous,
    /// Final classifier over the combined features
    Classifier,
}

/// Options for model construction.
pub struct BlockModelOptions {
    /// Builds heads, U-Nets and tabular pieces
    pub factory: Box<dyn ArchitectureFactory>,
    /// Replacement sub-backbones for tabular models
    pub tabular_overrides: HashMap<TabularPart, Box<dyn Module>>,
    /// Spatial size of the synthetic input used to probe backbones
    pub probe_size: usize,
}

impl BlockModelOptions {
    /// Replace one tabular sub-backbone.
    pub fn with_tabular(mut self, part: TabularPart, module: Box<dyn Module>) -> Self {
        self.tabular_overrides.insert(part, module);
        self
    }

    pub fn with_factory(mut self, factory: Box<dyn ArchitectureFactory>) -> Self {
        self.factory = factory;
        self
    }
}

impl Default for BlockModelOptions {
    fn default() -> Self {
        Self {
            factory: Box::new(DefaultArchitectures),
            tabular_overrides: HashMap::new(),
            probe_size: DEFAULT_PROBE_SIZE,
        }
    }
}

impl fmt::Debug for BlockModelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockModelOptions")
            .field("factory", &self.factory)
            .field("tabular_overrides", &self.tabular_overrides.keys().collect::<Vec<_>>())
            .field("probe_size", &self.probe_size)
            .finish()
    }
}

/// Constraint on block dimensionality for a registry rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimRule {
    /// Matches regardless of dimensionality
    Any,
    /// Output block has zero spatial dimensions
    ScalarOutput,
    /// Output block has as many spatial dimensions as the input block
    SameDims,
}

impl DimRule {
    pub fn matches(&self, inblock: &dyn Block, outblock: &dyn Block) -> bool {
        match self {
            DimRule::Any => true,
            DimRule::ScalarOutput => outblock.ndims() == Some(0),
            DimRule::SameDims => outblock.ndims().is_some() && outblock.ndims() == inblock.ndims(),
        }
    }
}

/// Builds a model for a matched block pair.
pub type ModelBuilder = Box<
    dyn Fn(&dyn Block, &dyn Block, Option<Box<dyn Module>>, &mut BlockModelOptions) -> Result<Box<dyn Module>>
        + Send
        + Sync,
>;

struct Rule {
    name: String,
    dims: DimRule,
    builder: ModelBuilder,
}

/// Registry mapping block kind pairs to model builders.
#[derive(Default)]
pub struct ModelRegistry {
    rules: HashMap<(BlockKind, BlockKind), Vec<Rule>>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self
            .rules
            .iter()
            .flat_map(|(key, rules)| rules.iter().map(move |r| (key, r.dims, r.name.as_str())))
            .collect();
        entries.sort_by_key(|(key, _, name)| (**key, *name));
        f.debug_struct("ModelRegistry").field("rules", &entries).finish()
    }
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the default combinations.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            BlockKind::ImageTensor,
            BlockKind::OneHotTensor,
            DimRule::ScalarOutput,
            "image classification",
            image_classification,
        );
        registry.register(
            BlockKind::ImageTensor,
            BlockKind::OneHotTensorMulti,
            DimRule::ScalarOutput,
            "image multi-label classification",
            image_classification,
        );
        registry.register(
            BlockKind::ImageTensor,
            BlockKind::OneHotTensor,
            DimRule::SameDims,
            "image segmentation",
            image_segmentation,
        );
        registry.register(
            BlockKind::ImageTensor,
            BlockKind::KeypointTensor,
            DimRule::SameDims,
            "keypoint regression",
            keypoint_regression,
        );
        registry.register(
            BlockKind::TableRow,
            BlockKind::Continuous,
            DimRule::Any,
            "tabular regression",
            tabular,
        );
        registry.register(
            BlockKind::TableRow,
            BlockKind::OneHotTensor,
            DimRule::ScalarOutput,
            "tabular classification",
            tabular,
        );
        registry
    }

    /// Register a builder for `(input, output)` blocks satisfying `dims`.
    ///
    /// Later registrations take precedence over earlier ones for the same pair.
    pub fn register<F>(&mut self, input: BlockKind, output: BlockKind, dims: DimRule, name: impl Into<String>, builder: F)
    where
        F: Fn(&dyn Block, &dyn Block, Option<Box<dyn Module>>, &mut BlockModelOptions) -> Result<Box<dyn Module>>
            + Send
            + Sync
            + 'static,
    {
        self.rules.entry((input, output)).or_default().push(Rule {
            name: name.into(),
            dims,
            builder: Box::new(builder),
        });
    }

    fn lookup(&self, inblock: &dyn Block, outblock: &dyn Block) -> Option<&Rule> {
        self.rules
            .get(&(inblock.kind(), outblock.kind()))?
            .iter()
            .rev()
            .find(|rule| rule.dims.matches(inblock, outblock))
    }

    /// Find the rule for a block pair, unwrapping decorators as needed.
    ///
    /// Returns the rule together with the blocks it matched.
    fn resolve<'a>(&self, inblock: &'a dyn Block, outblock: &'a dyn Block) -> Option<(&Rule, &'a dyn Block, &'a dyn Block)> {
        let mut input = inblock;
        let mut output = outblock;
        loop {
            if let Some(rule) = self.lookup(input, output) {
                return Some((rule, input, output));
            }
            match (input.wrapped(), output.wrapped()) {
                (Some(i), _) => input = i,
                (None, Some(o)) => output = o,
                (None, None) => return None,
            }
        }
    }

    /// Name of the rule that would build a model for this pair.
    pub fn resolve_name(&self, inblock: &dyn Block, outblock: &dyn Block) -> Option<&str> {
        self.resolve(inblock, outblock).map(|(rule, _, _)| rule.name.as_str())
    }

    /// Whether a model can be built for this pair.
    pub fn supports(&self, inblock: &dyn Block, outblock: &dyn Block) -> bool {
        self.resolve(inblock, outblock).is_some()
    }

    /// Build a model mapping `inblock` observations to `outblock` outputs.
    pub fn build(
        &self,
        inblock: &dyn Block,
        outblock: &dyn Block,
        backbone: Option<Box<dyn Module>>,
        mut options: BlockModelOptions,
    ) -> Result<Box<dyn Module>> {
        let Some((rule, input, output)) = self.resolve(inblock, outblock) else {
            return Err(BlockwiseError::UnsupportedBlockCombination {
                input: inblock.type_name(),
                output: outblock.type_name(),
            });
        };
        debug!(
            "building {} model for {} -> {}",
            rule.name,
            input.type_name(),
            output.type_name()
        );
        (rule.builder)(input, output, backbone, &mut options)
    }
}

/// Process-wide registry with the default combinations.
pub fn default_registry() -> &'static ModelRegistry {
    static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ModelRegistry::with_defaults)
}

/// Build a model for `inblock -> outblock` using the default registry.
pub fn blockmodel(
    inblock: &dyn Block,
    outblock: &dyn Block,
    backbone: Option<Box<dyn Module>>,
    options: BlockModelOptions,
) -> Result<Box<dyn Module>> {
    default_registry().build(inblock, outblock, backbone, options)
}

fn expect_block<'a, T: Block + 'static>(block: &'a dyn Block, other: &dyn Block) -> Result<&'a T> {
    downcast::<T>(block).ok_or_else(|| BlockwiseError::UnsupportedBlockCombination {
        input: block.type_name(),
        output: other.type_name(),
    })
}

fn require_backbone(backbone: Option<Box<dyn Module>>, inblock: &dyn Block) -> Result<Box<dyn Module>> {
    backbone.ok_or_else(|| {
        BlockwiseError::InvalidParameter(format!(
            "a backbone is required to build a model for {}",
            inblock.type_name()
        ))
    })
}

/// Number of classes of a one-hot output block.
fn class_count(outblock: &dyn Block, inblock: &dyn Block) -> Result<usize> {
    if let Some(b) = downcast::<OneHotTensor>(outblock) {
        Ok(b.classes().len())
    } else {
        Ok(expect_block::<OneHotTensorMulti>(outblock, inblock)?.classes().len())
    }
}

/// Synthetic probe input `[size; N] ++ [nchannels, 1]`.
fn probe_shape(image: &ImageTensor, size: usize) -> Vec<usize> {
    let ndims = image.ndims().unwrap_or(0);
    let mut shape = vec![size; ndims];
    shape.extend([image.nchannels(), 1]);
    shape
}

/// Channel count of the backbone's output on a probe input.
fn probe_channels(backbone: &dyn Module, image: &ImageTensor, size: usize) -> Result<usize> {
    let probe = probe_shape(image, size);
    let out = backbone.output_shape(&probe)?;
    if out.len() < 2 {
        return Err(BlockwiseError::Shape(format!(
            "backbone output {:?} for probe {:?} has no channel dimension",
            out, probe
        )));
    }
    Ok(out[out.len() - 2])
}

fn image_classification(
    inblock: &dyn Block,
    outblock: &dyn Block,
    backbone: Option<Box<dyn Module>>,
    options: &mut BlockModelOptions,
) -> Result<Box<dyn Module>> {
    let image = expect_block::<ImageTensor>(inblock, outblock)?;
    let nclasses = class_count(outblock, inblock)?;
    let backbone = require_backbone(backbone, inblock)?;
    let channels = probe_channels(&*backbone, image, options.probe_size)?;
    let head = options.factory.vision_head(channels, nclasses);
    Ok(Box::new(Sequential::new(vec![backbone, head])))
}

fn image_segmentation(
    inblock: &dyn Block,
    outblock: &dyn Block,
    backbone: Option<Box<dyn Module>>,
    options: &mut BlockModelOptions,
) -> Result<Box<dyn Module>> {
    let image = expect_block::<ImageTensor>(inblock, outblock)?;
    let nclasses = expect_block::<OneHotTensor>(outblock, inblock)?.classes().len();
    let backbone = require_backbone(backbone, inblock)?;
    let input_size = probe_shape(image, options.probe_size);
    options.factory.unet(backbone, input_size, nclasses)
}

fn keypoint_regression(
    inblock: &dyn Block,
    outblock: &dyn Block,
    backbone: Option<Box<dyn Module>>,
    options: &mut BlockModelOptions,
) -> Result<Box<dyn Module>> {
    let image = expect_block::<ImageTensor>(inblock, outblock)?;
    let keypoints = expect_block::<KeypointTensor>(outblock, inblock)?;
    let backbone = require_backbone(backbone, inblock)?;
    let channels = probe_channels(&*backbone, image, options.probe_size)?;
    let head = options.factory.vision_head(channels, keypoints.num_outputs());
    Ok(Box::new(Sequential::new(vec![backbone, head])))
}

fn tabular(
    inblock: &dyn Block,
    outblock: &dyn Block,
    backbone: Option<Box<dyn Module>>,
    options: &mut BlockModelOptions,
) -> Result<Box<dyn Module>> {
    let row = expect_block::<TableRow>(inblock, outblock)?;
    let nout = match downcast::<Continuous>(outblock) {
        Some(c) => c.size(),
        None => expect_block::<OneHotTensor>(outblock, inblock)?.classes().len(),
    };
    if backbone.is_some() {
        warn!("tabular models are built from sub-backbones; ignoring the backbone argument");
    }

    let ncat = row.catcols().len();
    let ncont = row.contcols().len();

    let categorical = match options.tabular_overrides.remove(&TabularPart::Categorical) {
        Some(module) => module,
        None => options.factory.tabular_embeddings(&row.cardinalities()),
    };
    let continuous = match options.tabular_overrides.remove(&TabularPart::Continuous) {
        Some(module) => module,
        None => options.factory.tabular_continuous(ncont),
    };
    let classifier = match options.tabular_overrides.remove(&TabularPart::Classifier) {
        Some(module) => module,
        None => {
            let cat_width = feature_width(&*categorical, &[ncat, 1])?;
            let cont_width = feature_width(&*continuous, &[ncont, 1])?;
            options.factory.tabular_classifier(cat_width + cont_width, nout)
        }
    };

    Ok(Box::new(TabularModel::new(
        ncat,
        ncont,
        categorical,
        continuous,
        classifier,
    )))
}
