use std::io;

use thiserror::Error;

/// Errors produced while loading the transformation catalog from a
/// configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file")]
    Io(#[from] io::Error),

    #[error("line {line}: expected \"<name> <capacity>\", got {text:?}")]
    Malformed { line: usize, text: String },

    #[error("line {line}: capacity {text:?} is not a valid non-negative integer")]
    BadCapacity { line: usize, text: String },

    #[error("transformation {name:?} is declared more than once")]
    DuplicateName { name: String },
}

/// Errors produced while validating an admitted request against the
/// catalog.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request has no operations")]
    EmptyOps,

    #[error("unknown transformation {name:?}")]
    UnknownTransformation { name: String },
}

/// Returned by [`crate::router::sorter::RequestSorter::enqueue`] when a
/// required queue is at capacity.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("request sorter queue for transformation index {index} is full")]
pub struct SorterFullError {
    pub index: usize,
}
