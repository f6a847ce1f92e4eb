//! Structured reports describing why an observation does or does not fit a block.

use itertools::Itertools;
use std::fmt;

/// Reason an observation was rejected by a block.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckFailure {
    /// Observation has the wrong type altogether
    WrongType {
        expected: String,
        found: String,
    },
    /// A sequence contains elements of the wrong type
    WrongElementType {
        index: usize,
        expected: String,
        found: String,
    },
    /// Sequence length differs from the block size
    WrongLength { expected: usize, found: usize },
    /// Tensor shape does not match the block
    WrongShape { expected: String, found: Vec<usize> },
    /// Tensor values fall outside the allowed range or encoding
    InvalidValues(String),
    /// Single value is not one of the block's classes
    NotInClasses { value: String },
    /// Multi-label sequence contains values outside the block's classes
    UnknownMembers { members: Vec<String> },
    /// Tabular row is missing a required column
    MissingColumn { column: String },
    /// Tabular row has an invalid cell
    InvalidColumn { column: String, reason: String },
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFailure::WrongType { expected, found } => {
                write!(f, "wrong type: expected {}, found {}", expected, found)
            }
            CheckFailure::WrongElementType {
                index,
                expected,
                found,
            } => write!(
                f,
                "wrong element type at index {}: expected {}, found {}",
                index, expected, found
            ),
            CheckFailure::WrongLength { expected, found } => {
                write!(f, "wrong length: expected {}, found {}", expected, found)
            }
            CheckFailure::WrongShape { expected, found } => {
                write!(f, "wrong shape: expected {}, found {:?}", expected, found)
            }
            CheckFailure::InvalidValues(reason) => write!(f, "invalid values: {}", reason),
            CheckFailure::NotInClasses { value } => {
                write!(f, "value {} is not in the allowed set of classes", value)
            }
            CheckFailure::UnknownMembers { members } => write!(
                f,
                "contains unknown members: {}",
                members.iter().join(", ")
            ),
            CheckFailure::MissingColumn { column } => write!(f, "missing column {:?}", column),
            CheckFailure::InvalidColumn { column, reason } => {
                write!(f, "column {:?}: {}", column, reason)
            }
        }
    }
}

/// Pass/fail report from `Block::diagnose`.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    /// Block the observation was checked against
    pub block: String,
    /// `None` when the observation is valid
    pub failure: Option<CheckFailure>,
}

impl CheckReport {
    pub fn pass(block: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            failure: None,
        }
    }

    pub fn fail(block: impl Into<String>, failure: CheckFailure) -> Self {
        Self {
            block: block.into(),
            failure: Some(failure),
        }
    }

    #[inline]
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    /// Human-readable explanation of the outcome.
    pub fn message(&self) -> String {
        match &self.failure {
            None => format!("observation is a valid instance of {}", self.block),
            Some(failure) => format!(
                "observation is not a valid instance of {}: {}",
                self.block, failure
            ),
        }
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}
