//! Backbone and head factories used by model construction.
//!
//! `ArchitectureFactory` is the seam to a deep-learning runtime: model
//! construction only decides *which* pieces to build and with what sizes,
//! the factory decides what those pieces are. `DefaultArchitectures` builds
//! the reference layer descriptors from `crate::model`.

use crate::model::{
    Activation, AdaptiveMeanPool, BatchNorm, Dense, Dropout, Embedding, Flatten, Module,
    Sequential, TabularEmbeddings, UNet,
};
use crate::Result;
use std::fmt;

/// Hidden width of the vision classification head.
pub const VISION_HEAD_HIDDEN: usize = 512;

/// Hidden layer widths of the default tabular classifier.
pub const TABULAR_HIDDEN: [usize; 2] = [200, 100];

/// Upper bound on a categorical embedding width.
pub const MAX_EMBEDDING_WIDTH: usize = 600;

/// Embedding width for a column with `cardinality` categories.
///
/// `min(600, round(1.6 * n^0.56))`
pub fn embedding_width(cardinality: usize) -> usize {
    let width = (1.6 * (cardinality as f64).powf(0.56)).round() as usize;
    width.min(MAX_EMBEDDING_WIDTH)
}

/// Builders for the sub-models assembled by `blockmodel`.
pub trait ArchitectureFactory: fmt::Debug + Send + Sync {
    /// Classification/regression head on top of `in_channels` feature maps.
    fn vision_head(&self, in_channels: usize, nout: usize) -> Box<dyn Module>;

    /// Segmentation model around `backbone` producing `nout` channels at the
    /// input resolution.
    fn unet(&self, backbone: Box<dyn Module>, input_size: Vec<usize>, nout: usize) -> Result<Box<dyn Module>>;

    /// Embedding backbone for categorical columns with the given cardinalities.
    fn tabular_embeddings(&self, cardinalities: &[usize]) -> Box<dyn Module>;

    /// Backbone for `ncont` continuous columns.
    fn tabular_continuous(&self, ncont: usize) -> Box<dyn Module>;

    /// Final classifier from `in_width` combined features to `nout` outputs.
    fn tabular_classifier(&self, in_width: usize, nout: usize) -> Box<dyn Module>;
}

/// Reference architectures built from `crate::model` layers.
#[derive(Debug, Clone, Default)]
pub struct DefaultArchitectures;

impl ArchitectureFactory for DefaultArchitectures {
    fn vision_head(&self, in_channels: usize, nout: usize) -> Box<dyn Module> {
        Box::new(Sequential::new(vec![
            Box::new(AdaptiveMeanPool),
            Box::new(Flatten),
            Box::new(BatchNorm::new(in_channels)),
            Box::new(Dropout::new(0.25)),
            Box::new(Dense::new(in_channels, VISION_HEAD_HIDDEN)),
            Box::new(Activation::relu()),
            Box::new(BatchNorm::new(VISION_HEAD_HIDDEN)),
            Box::new(Dropout::new(0.5)),
            Box::new(Dense::new(VISION_HEAD_HIDDEN, nout)),
        ]))
    }

    fn unet(&self, backbone: Box<dyn Module>, input_size: Vec<usize>, nout: usize) -> Result<Box<dyn Module>> {
        Ok(Box::new(UNet::new(backbone, input_size, nout)?))
    }

    fn tabular_embeddings(&self, cardinalities: &[usize]) -> Box<dyn Module> {
        // One extra slot per column for missing values
        let embeddings = cardinalities
            .iter()
            .map(|&n| Embedding::new(n + 1, embedding_width(n + 1)))
            .collect();
        Box::new(TabularEmbeddings::new(embeddings, 0.0))
    }

    fn tabular_continuous(&self, ncont: usize) -> Box<dyn Module> {
        Box::new(BatchNorm::new(ncont))
    }

    fn tabular_classifier(&self, in_width: usize, nout: usize) -> Box<dyn Module> {
        let [h1, h2] = TABULAR_HIDDEN;
        Box::new(Sequential::new(vec![
            Box::new(Dense::new(in_width, h1)),
            Box::new(Activation::relu()),
            Box::new(Dense::new(h1, h2)),
            Box::new(Activation::relu()),
            Box::new(Dense::new(h2, nout)),
        ]))
    }
}
