//! detci Pipeline Crate
//!
//! Turns a declarative workflow descriptor into a deterministic, ordered step
//! sequence per matrix cell, and runs those sequences locally.
//!
//! ## Modules
//!
//! - [`workflow`]: the descriptor (jobs, matrix strategy, step specs)
//! - [`lint`]: typed lint checkers and their command lines
//! - [`interpolate`]: `${{ matrix.* }}` / `${{ env.* }}` substitution
//! - [`plan`]: per-cell planning and configuration validation
//! - [`executor`]: step runners and the sequential cell executor
//! - [`cache`]: stale build-cache removal

pub mod cache;
pub mod error;
pub mod executor;
pub mod interpolate;
pub mod lint;
pub mod plan;
pub mod workflow;

pub use error::{PlanError, WorkflowError};
pub use executor::{
    CellReport, CellStatus, DryRunner, ExecError, JobReport, PipelineExecutor, ShellRunner,
    StepContext, StepOutcome, StepRunner, StepStatus,
};
pub use lint::{Checker, DocstringGate};
pub use plan::{CellPlan, JobPlan, PlannedStep, Planner, ResolvedAction, ResolvedStep};
pub use workflow::{JobSpec, LintSpec, Script, StepSpec, Strategy, Workflow};
