//! Workflow descriptor: jobs, matrix strategy and step specs.

use crate::error::WorkflowError;
use crate::lint::Checker;
use detci_matrix::{CellKeys, MatrixSpec, Predicate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info};

/// Descriptor shipped with the crate: lint + CUDA 10.1 build matrix for mmdet3d.
const REFERENCE_WORKFLOW: &str = include_str!("../../configs/mmdet3d.json");

/// A complete pipeline description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default = "default_triggers")]
    pub on: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub jobs: Vec<JobSpec>,
}

fn default_triggers() -> Vec<String> {
    vec!["push".to_string(), "pull_request".to_string()]
}

impl Workflow {
    /// Load a descriptor from a JSON file.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        debug!("Loading workflow descriptor");
        let file = File::open(path.as_ref())?;
        let workflow: Workflow = serde_json::from_reader(BufReader::new(file))?;
        workflow.check_shape()?;
        info!(
            "Workflow '{}' loaded: {} jobs",
            workflow.name,
            workflow.jobs.len()
        );
        Ok(workflow)
    }

    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        let workflow: Workflow = serde_json::from_str(json)?;
        workflow.check_shape()?;
        Ok(workflow)
    }

    /// The bundled mmdet3d descriptor.
    pub fn reference() -> Result<Self, WorkflowError> {
        Self::from_json(REFERENCE_WORKFLOW)
    }

    pub fn job(&self, id: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Whether an event name triggers this workflow.
    pub fn triggered_by(&self, event: &str) -> bool {
        self.on.iter().any(|e| e == event)
    }

    fn check_shape(&self) -> Result<(), WorkflowError> {
        if self.jobs.is_empty() {
            return Err(WorkflowError::NoJobs);
        }
        for (i, job) in self.jobs.iter().enumerate() {
            if self.jobs[..i].iter().any(|j| j.id == job.id) {
                return Err(WorkflowError::DuplicateJob(job.id.clone()));
            }
        }
        Ok(())
    }
}

/// One job: either a fixed single configuration or a matrix of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub runs_on: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    /// Checkers appended after `steps`, in declaration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<LintSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub matrix: MatrixSpec,
    /// Keys that make up the typed cell tuple. When set, every cell must
    /// define all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<CellKeys>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintSpec {
    pub checkers: Vec<Checker>,
}

/// A shell script written either as one string or as a list of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Script {
    Line(String),
    Lines(Vec<String>),
}

impl Script {
    pub fn text(&self) -> String {
        match self {
            Script::Line(line) => line.clone(),
            Script::Lines(lines) => lines.join("\n"),
        }
    }
}

/// A step descriptor. Exactly one of `run`, `remove_dir` or `uses` is set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Script>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, rename = "with", skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// A failure of this step is recorded but does not fail the cell.
    #[serde(default)]
    pub continue_on_error: bool,
    /// The step's condition must hold for exactly one cell of the matrix.
    #[serde(default)]
    pub designated: bool,
}

impl StepSpec {
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: Some(Script::Line(command.into())),
            ..Default::default()
        }
    }

    pub fn remove_dir(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remove_dir: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn uses(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uses: Some(action.into()),
            ..Default::default()
        }
    }

    pub fn when(mut self, condition: Predicate) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn designated(mut self) -> Self {
        self.designated = true;
        self
    }
}
