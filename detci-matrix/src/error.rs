//! Error types for matrix expansion and predicate evaluation.

use thiserror::Error;

/// Errors raised while expanding a matrix or reading its cells.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatrixError {
    #[error("Invalid version string: '{0}'")]
    InvalidVersion(String),

    #[error("Matrix axis '{0}' has no values")]
    EmptyAxis(String),

    #[error("Matrix axis '{0}' is declared more than once")]
    DuplicateAxis(String),

    #[error("Matrix has no axes")]
    NoAxes,

    #[error("Every matrix combination is excluded")]
    EmptyMatrix,

    #[error("Include entry {index} ({entry}) matches no combination and does not define every axis")]
    UnmatchedInclude { index: usize, entry: String },

    #[error("Cell [{cell}] has no value for '{key}'")]
    MissingKey { cell: String, key: String },

    #[error("Unknown matrix key: '{0}'")]
    UnknownKey(String),

    #[error("Invalid toolkit version: '{0}'")]
    InvalidToolkit(String),

    #[error("CUDA_SHORT '{short}' does not match CUDA '{cuda}' (expected '{expected}')")]
    ToolkitMismatch {
        cuda: String,
        short: String,
        expected: String,
    },
}
