//! Block configuration serialization.
//!
//! This module provides types and methods for serializing and deserializing
//! block descriptors, so that a task definition (input block, target block
//! and encoded model blocks) can be saved next to a trained model and
//! restored later.
//!
//! # Architecture
//!
//! The serialization system has two layers:
//! 1. **BlockConfig** - Enum holding the constructor parameters of each block type
//! 2. **TaskConfig** - Named set of block configurations plus metadata
//!
//! # Example
//!
//! ```
//! use blockwise::blocks::Label;
//! use blockwise::{Block, BlockConfig};
//!
//! let block = Label::new(["cat", "dog"]);
//! let json = block.to_config().to_json().unwrap();
//!
//! let restored = BlockConfig::from_json(&json).unwrap().build().unwrap();
//! assert_eq!(restored.type_name(), "Label(2 classes)");
//! ```

use crate::block::Block;
use crate::blocks::{
    Continuous, ImageTensor, KeypointTensor, Label, LabelMulti, OneHotTensor, OneHotTensorMulti,
    TableRow, WrapperBlock,
};
use crate::obs::Obs;
use crate::{BlockwiseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Configuration for a specific block type.
///
/// This enum captures all the constructor parameters needed to recreate
/// a block. Each variant corresponds to a block type in `blockwise::blocks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BlockConfig {
    /// Continuous configuration
    Continuous { size: usize },

    /// Label configuration
    Label { classes: Vec<Obs> },

    /// LabelMulti configuration
    LabelMulti { classes: Vec<Obs> },

    /// ImageTensor configuration
    ImageTensor { ndims: usize, nchannels: usize },

    /// KeypointTensor configuration
    KeypointTensor { ndims: usize, sz: Vec<usize> },

    /// OneHotTensor configuration
    OneHotTensor { ndims: usize, classes: Vec<Obs> },

    /// OneHotTensorMulti configuration
    OneHotTensorMulti { ndims: usize, classes: Vec<Obs> },

    /// TableRow configuration
    TableRow {
        catcols: Vec<String>,
        contcols: Vec<String>,
        categorydict: BTreeMap<String, Vec<Obs>>,
    },

    /// WrapperBlock configuration
    Wrapper { name: String, inner: Box<BlockConfig> },
}

impl BlockConfig {
    /// Recreate the block described by this configuration.
    pub fn build(&self) -> Result<Box<dyn Block>> {
        let block: Box<dyn Block> = match self {
            BlockConfig::Continuous { size } => Box::new(Continuous::new(*size)),
            BlockConfig::Label { classes } => {
                if classes.is_empty() {
                    return Err(BlockwiseError::InvalidParameter(
                        "Label configuration has no classes".to_string(),
                    ));
                }
                Box::new(Label::new(classes.clone()))
            }
            BlockConfig::LabelMulti { classes } => Box::new(LabelMulti::new(classes.clone())),
            BlockConfig::ImageTensor { ndims, nchannels } => {
                Box::new(ImageTensor::new(*ndims, *nchannels))
            }
            BlockConfig::KeypointTensor { ndims, sz } => {
                Box::new(KeypointTensor::new(*ndims, sz.clone()))
            }
            BlockConfig::OneHotTensor { ndims, classes } => {
                Box::new(OneHotTensor::new(*ndims, classes.clone()))
            }
            BlockConfig::OneHotTensorMulti { ndims, classes } => {
                Box::new(OneHotTensorMulti::new(*ndims, classes.clone()))
            }
            BlockConfig::TableRow {
                catcols,
                contcols,
                categorydict,
            } => Box::new(TableRow::new(
                catcols.clone(),
                contcols.clone(),
                categorydict.clone(),
            )?),
            BlockConfig::Wrapper { name, inner } => {
                Box::new(WrapperBlock::from_boxed(name.clone(), inner.build()?))
            }
        };
        Ok(block)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to binary (bincode).
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary (bincode).
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Named block configurations describing a learning task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    /// Version of the serialization format
    pub version: String,

    /// Block configurations keyed by role, e.g. `input`, `target`
    pub blocks: BTreeMap<String, BlockConfig>,

    /// Optional metadata (name, description, etc.)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TaskConfig {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            blocks: BTreeMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Add a block under `role`.
    pub fn with_block(mut self, role: impl Into<String>, block: &dyn Block) -> Self {
        self.blocks.insert(role.into(), block.to_config());
        self
    }

    /// Add metadata to the configuration.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Rebuild the block stored under `role`.
    pub fn block(&self, role: &str) -> Result<Box<dyn Block>> {
        self.blocks
            .get(role)
            .ok_or_else(|| BlockwiseError::InvalidParameter(format!("no block for role {:?}", role)))?
            .build()
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to binary (bincode).
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary (bincode).
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_config_serialization() {
        let config = BlockConfig::OneHotTensor {
            ndims: 0,
            classes: vec![Obs::from("cat"), Obs::from("dog")],
        };

        // Test JSON round-trip
        let json = serde_json::to_string(&config).unwrap();
        let restored: BlockConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);

        // Test binary round-trip
        let binary = config.to_binary().unwrap();
        let restored = BlockConfig::from_binary(&binary).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn test_every_block_rebuilds_to_same_config() {
        let table = TableRow::new(
            vec!["city".to_string()],
            vec!["age".to_string()],
            [("city".to_string(), vec![Obs::from("oslo")])].into_iter().collect(),
        )
        .unwrap();
        let blocks: Vec<Box<dyn Block>> = vec![
            Box::new(Continuous::new(3)),
            Box::new(Label::new([1, 2])),
            Box::new(LabelMulti::new(["a"])),
            Box::new(ImageTensor::new(2, 3)),
            Box::new(KeypointTensor::new(2, vec![4])),
            Box::new(OneHotTensor::new(2, ["bg", "fg"])),
            Box::new(OneHotTensorMulti::new(0, ["a", "b"])),
            Box::new(table),
            Box::new(WrapperBlock::new("named", Continuous::new(1))),
        ];
        for block in &blocks {
            let config = block.to_config();
            let rebuilt = config.build().unwrap();
            assert_eq!(rebuilt.type_name(), block.type_name());
            assert_eq!(rebuilt.to_config(), config);
        }
    }

    #[test]
    fn test_empty_label_config_is_rejected() {
        let config = BlockConfig::Label { classes: vec![] };
        assert!(config.build().is_err());
    }

    #[test]
    fn test_task_config() {
        let task = TaskConfig::new()
            .with_block("input", &ImageTensor::new(2, 3))
            .with_block("target", &Label::new(["cat", "dog"]))
            .with_metadata("name", "pets");

        let binary = task.to_binary().unwrap();
        let restored = TaskConfig::from_binary(&binary).unwrap();
        assert_eq!(task, restored);

        let json = task.to_json().unwrap();
        let restored = TaskConfig::from_json(&json).unwrap();
        assert_eq!(restored.block("target").unwrap().type_name(), "Label(2 classes)");
        assert!(restored.block("missing").is_err());
        assert_eq!(restored.metadata.get("name").unwrap(), "pets");
    }
}
