//! Per-cell planning.
//!
//! A [`Planner`] expands a job into one [`CellPlan`] per matrix cell. Every
//! step condition is evaluated and every expression is substituted here, so
//! the resulting step sequence is fully deterministic and nothing is decided
//! at execution time.

use crate::error::PlanError;
use crate::interpolate::{Scope, interpolate, interpolate_map};
use crate::lint;
use crate::workflow::{JobSpec, StepSpec, Workflow};
use detci_matrix::{Assignment, MatrixCell, ToolkitVersion};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

const CUDA: &str = "CUDA";
const CUDA_SHORT: &str = "CUDA_SHORT";

/// A step action with all expressions substituted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedAction {
    Run { command: String },
    RemoveDir { path: PathBuf },
    /// Handled by the hosting scheduler (checkout, runtime setup, uploads).
    Uses {
        action: String,
        inputs: BTreeMap<String, String>,
    },
}

impl fmt::Display for ResolvedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedAction::Run { command } => write!(f, "run: {}", command.replace('\n', "; ")),
            ResolvedAction::RemoveDir { path } => write!(f, "remove_dir: {}", path.display()),
            ResolvedAction::Uses { action, inputs } => {
                write!(f, "uses: {}", action)?;
                for (k, v) in inputs {
                    write!(f, " {}={}", k, v)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedStep {
    pub name: String,
    pub action: ResolvedAction,
    /// Step-level env; layered over the cell env at execution.
    pub env: BTreeMap<String, String>,
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlannedStep {
    Active(ResolvedStep),
    Skipped { name: String, condition: String },
}

impl PlannedStep {
    pub fn name(&self) -> &str {
        match self {
            PlannedStep::Active(step) => &step.name,
            PlannedStep::Skipped { name, .. } => name,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, PlannedStep::Active(_))
    }
}

/// The ordered step sequence of one matrix cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellPlan {
    pub index: usize,
    pub assignment: Assignment,
    #[serde(skip)]
    pub cell: Option<MatrixCell>,
    pub env: BTreeMap<String, String>,
    pub steps: Vec<PlannedStep>,
}

impl CellPlan {
    pub fn label(&self) -> String {
        if self.assignment.is_empty() {
            format!("#{}", self.index)
        } else {
            format!("#{} ({})", self.index, self.assignment)
        }
    }

    pub fn active_steps(&self) -> impl Iterator<Item = &ResolvedStep> {
        self.steps.iter().filter_map(|step| match step {
            PlannedStep::Active(resolved) => Some(resolved),
            PlannedStep::Skipped { .. } => None,
        })
    }

    pub fn step(&self, name: &str) -> Option<&PlannedStep> {
        self.steps.iter().find(|step| step.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPlan {
    pub job_id: String,
    pub runs_on: String,
    pub cells: Vec<CellPlan>,
}

/// Expands workflow jobs into cell plans.
pub struct Planner<'w> {
    workflow: &'w Workflow,
}

impl<'w> Planner<'w> {
    pub fn new(workflow: &'w Workflow) -> Self {
        Self { workflow }
    }

    /// Plan every job.
    pub fn plan_all(&self) -> Result<Vec<JobPlan>, PlanError> {
        self.workflow
            .jobs
            .iter()
            .map(|job| self.plan(job))
            .collect()
    }

    pub fn plan_job(&self, id: &str) -> Result<JobPlan, PlanError> {
        let job = self
            .workflow
            .job(id)
            .ok_or_else(|| PlanError::UnknownJob(id.to_string()))?;
        self.plan(job)
    }

    /// Plan every job and report all hazards, not just the first one of each
    /// job.
    pub fn validate(&self) -> Vec<PlanError> {
        self.workflow
            .jobs
            .iter()
            .flat_map(|job| self.plan_collecting(job).err().unwrap_or_default())
            .collect()
    }

    fn plan(&self, job: &JobSpec) -> Result<JobPlan, PlanError> {
        self.plan_collecting(job).map_err(|hazards| {
            hazards.into_iter().next().unwrap_or_else(|| PlanError::EmptyJob {
                job: job.id.clone(),
            })
        })
    }

    /// Plan a job, carrying on past hazards that still leave a usable cell so
    /// later ones are found too. Hazards come back in discovery order.
    #[tracing::instrument(skip_all, fields(job = %job.id))]
    fn plan_collecting(&self, job: &JobSpec) -> Result<JobPlan, Vec<PlanError>> {
        let mut hazards = Vec::new();

        if let Some(Err(e)) = job
            .lint
            .as_ref()
            .map(|lint_spec| lint::check_order(&job.id, &lint_spec.checkers))
        {
            hazards.push(e);
        }

        let steps = job_steps(job);
        if steps.is_empty() {
            hazards.push(PlanError::EmptyJob {
                job: job.id.clone(),
            });
            return Err(hazards);
        }

        let assignments = match &job.strategy {
            Some(strategy) => match strategy.matrix.expand() {
                Ok(assignments) => assignments,
                Err(source) => {
                    hazards.push(PlanError::Matrix {
                        job: job.id.clone(),
                        source,
                    });
                    return Err(hazards);
                }
            },
            None => vec![Assignment::new()],
        };

        let mut cells = Vec::with_capacity(assignments.len());
        let mut complete = true;
        for (index, assignment) in assignments.into_iter().enumerate() {
            let cell = match job.strategy.as_ref().and_then(|s| s.cell.as_ref()) {
                Some(keys) => match MatrixCell::from_assignment(&assignment, keys) {
                    Ok(cell) => Some(cell),
                    Err(source) => {
                        record(
                            &mut hazards,
                            PlanError::Matrix {
                                job: job.id.clone(),
                                source,
                            },
                        );
                        None
                    }
                },
                None => None,
            };

            let env = match self.cell_env(job, &assignment, &mut hazards) {
                Ok(env) => env,
                Err(e) => {
                    record(&mut hazards, e);
                    complete = false;
                    continue;
                }
            };

            let mut planned = Vec::with_capacity(steps.len());
            for spec in &steps {
                match plan_step(&job.id, spec, &assignment, &env) {
                    Ok(step) => planned.push(step),
                    Err(e) => record(&mut hazards, e),
                }
            }
            if planned.len() != steps.len() {
                complete = false;
                continue;
            }

            debug!(
                "Cell {} planned: {} active of {} steps",
                index,
                planned.iter().filter(|s| s.is_active()).count(),
                planned.len()
            );

            cells.push(CellPlan {
                index,
                assignment,
                cell,
                env,
                steps: planned,
            });
        }

        // Cardinality is only meaningful when every cell made it into the plan.
        if complete {
            if let Err(e) = check_designated(&job.id, &steps, &cells) {
                hazards.push(e);
            }
        }

        if !hazards.is_empty() {
            warn!("Job '{}' has {} hazard(s)", job.id, hazards.len());
            return Err(hazards);
        }

        info!("Planned job '{}': {} cells", job.id, cells.len());
        Ok(JobPlan {
            job_id: job.id.clone(),
            runs_on: job.runs_on.clone(),
            cells,
        })
    }

    /// Workflow env, then job env with matrix expressions substituted, then
    /// the toolkit short version.
    ///
    /// A toolkit mismatch is recorded as a hazard and leaves the declared
    /// values in place so planning can go on.
    fn cell_env(
        &self,
        job: &JobSpec,
        assignment: &Assignment,
        hazards: &mut Vec<PlanError>,
    ) -> Result<BTreeMap<String, String>, PlanError> {
        let mut env = self.workflow.env.clone();
        let job_env = interpolate_map(&job.env, &Scope::new(assignment, &self.workflow.env))?;
        env.extend(job_env);

        if let Some(cuda) = env.get(CUDA).cloned() {
            let toolkit = match env.get(CUDA_SHORT) {
                Some(short) => ToolkitVersion::new(&cuda, short),
                None => ToolkitVersion::derive(&cuda),
            };
            match toolkit {
                Ok(toolkit) => {
                    env.insert(CUDA_SHORT.to_string(), toolkit.short().to_string());
                }
                Err(source) => record(
                    hazards,
                    PlanError::Toolkit {
                        job: job.id.clone(),
                        source,
                    },
                ),
            }
        }

        Ok(env)
    }
}

/// Relative, free of `..` and naming something below the workdir, so joining it onto the workdir can
/// never leave the checkout.
fn is_inside_workdir(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)))
}

/// Add a hazard unless an identical one was already found in another cell.
fn record(hazards: &mut Vec<PlanError>, hazard: PlanError) {
    if !hazards.contains(&hazard) {
        hazards.push(hazard);
    }
}

/// Declared steps followed by the lint checkers.
fn job_steps(job: &JobSpec) -> Vec<StepSpec> {
    let mut steps = job.steps.clone();
    if let Some(lint_spec) = &job.lint {
        steps.extend(lint_spec.checkers.iter().map(|c| c.to_step()));
    }
    steps
}

fn plan_step(
    job: &str,
    spec: &StepSpec,
    assignment: &Assignment,
    cell_env: &BTreeMap<String, String>,
) -> Result<PlannedStep, PlanError> {
    let invalid = |reason: &str| PlanError::InvalidStep {
        job: job.to_string(),
        step: spec.name.clone(),
        reason: reason.to_string(),
    };

    let scope = Scope::new(assignment, cell_env);
    let name = interpolate(&spec.name, &scope)?;

    if let Some(condition) = &spec.condition {
        let holds = condition
            .evaluate(assignment)
            .map_err(|source| PlanError::Condition {
                job: job.to_string(),
                step: spec.name.clone(),
                source,
            })?;
        if !holds {
            return Ok(PlannedStep::Skipped {
                name,
                condition: condition.to_string(),
            });
        }
    }

    let step_env = interpolate_map(&spec.env, &scope)?;
    let mut merged = cell_env.clone();
    merged.extend(step_env.clone());
    let step_scope = Scope::new(assignment, &merged);

    let action = match (&spec.run, &spec.remove_dir, &spec.uses) {
        (Some(script), None, None) => ResolvedAction::Run {
            command: interpolate(&script.text(), &step_scope)?,
        },
        (None, Some(path), None) => {
            let path = PathBuf::from(interpolate(path, &step_scope)?.trim());
            if !is_inside_workdir(&path) {
                return Err(invalid("remove_dir needs a relative cache path inside the workdir"));
            }
            ResolvedAction::RemoveDir { path }
        }
        (None, None, Some(action)) => ResolvedAction::Uses {
            action: interpolate(action, &step_scope)?,
            inputs: interpolate_map(&spec.inputs, &step_scope)?,
        },
        (None, None, None) => return Err(invalid("no action (run, remove_dir or uses)")),
        _ => return Err(invalid("more than one action (run, remove_dir, uses)")),
    };

    if !spec.inputs.is_empty() && !matches!(action, ResolvedAction::Uses { .. }) {
        warn!("Step '{}' declares inputs but is not a 'uses' step", spec.name);
    }

    Ok(PlannedStep::Active(ResolvedStep {
        name,
        action,
        env: step_env,
        continue_on_error: spec.continue_on_error,
    }))
}

fn check_designated(job: &str, steps: &[StepSpec], cells: &[CellPlan]) -> Result<(), PlanError> {
    for (position, spec) in steps.iter().enumerate() {
        if !spec.designated {
            continue;
        }
        let count = cells
            .iter()
            .filter(|cell| cell.steps[position].is_active())
            .count();
        if count != 1 {
            return Err(PlanError::DesignatedCellCount {
                job: job.to_string(),
                step: spec.name.clone(),
                count,
            });
        }
    }
    Ok(())
}
