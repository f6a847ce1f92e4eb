//! Error types for the Blockwise crate.
//!
//! This module provides a unified error type for block validation, model
//! construction and fine-tuning, using the `thiserror` crate for ergonomic
//! error handling.

use crate::model::ParamId;
use thiserror::Error;

/// The main error type for Blockwise operations.
///
/// Every variant is raised at the point of detection. Nothing in this crate
/// retries or recovers from these errors internally.
#[derive(Error, Debug)]
pub enum BlockwiseError {
    /// Observation is not a valid instance of a block
    #[error("Invalid observation for block {block}: {reason}")]
    BlockValidation {
        /// Block type description
        block: String,
        /// Why the observation was rejected
        reason: String,
    },

    /// No model builder is registered for an (input, output) block pair
    #[error("Unsupported block combination: no model builder for input block {input} and output block {output}")]
    UnsupportedBlockCombination {
        /// Input block type description
        input: String,
        /// Output block type description
        output: String,
    },

    /// A parameter grouper could not be derived for the model
    #[error("Could not resolve a parameter grouper: {0}")]
    GrouperResolution(String),

    /// A trainable parameter is not covered by any parameter group
    #[error("Trainable parameter {param} is not assigned to any parameter group")]
    UngroupedParameter {
        /// The offending parameter
        param: ParamId,
    },

    /// Block sizes are incompatible for the requested operation
    #[error("Block size mismatch: expected {expected}, got {actual}")]
    BlockSizeMismatch {
        /// Size of the model output block
        expected: usize,
        /// Size of the target block
        actual: usize,
    },

    /// Invalid parameter value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Shape inference failed
    #[error("Shape error: {0}")]
    Shape(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary serialization error occurred
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON serialization error occurred
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error raised by an external training collaborator
    #[error("Trainer error: {0}")]
    Trainer(#[from] anyhow::Error),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// A specialized `Result` type for Blockwise operations.
pub type Result<T> = std::result::Result<T, BlockwiseError>;
