use detci_pipeline::{PlanError, WorkflowError};
use detci_vis::ExportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Workflow has {0} configuration hazard(s)")]
    Invalid(usize),

    #[error("Job '{job}' has no cell #{index} (cells: {count})")]
    UnknownCell {
        job: String,
        index: usize,
        count: usize,
    },

    #[error("Job '{job}' failed in {failed} cell(s)")]
    JobFailed { job: String, failed: usize },
}
