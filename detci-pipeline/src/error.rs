//! Error types for loading and planning workflows.

use detci_matrix::MatrixError;
use thiserror::Error;

/// Errors raised while loading a workflow descriptor.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Descriptor parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Workflow declares no jobs")]
    NoJobs,

    #[error("Job '{0}' is declared more than once")]
    DuplicateJob(String),
}

/// Configuration hazards found while planning a job.
///
/// All of these are detected before any step runs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error("Unknown job: '{0}'")]
    UnknownJob(String),

    #[error("Job '{job}' has no steps")]
    EmptyJob { job: String },

    #[error("Job '{job}': matrix error: {source}")]
    Matrix {
        job: String,
        #[source]
        source: MatrixError,
    },

    #[error("Job '{job}': toolkit error: {source}")]
    Toolkit {
        job: String,
        #[source]
        source: MatrixError,
    },

    #[error("Job '{job}', step '{step}': {reason}")]
    InvalidStep {
        job: String,
        step: String,
        reason: String,
    },

    #[error("Job '{job}', step '{step}': condition error: {source}")]
    Condition {
        job: String,
        step: String,
        #[source]
        source: MatrixError,
    },

    #[error("Cannot expand '{expression}': {reason}")]
    Interpolation { expression: String, reason: String },

    #[error("Job '{job}': checker '{found}' must not follow '{after}'")]
    LintOrder {
        job: String,
        found: String,
        after: String,
    },

    #[error("Job '{job}', step '{step}': designated step must select exactly one cell, selected {count}")]
    DesignatedCellCount {
        job: String,
        step: String,
        count: usize,
    },
}
