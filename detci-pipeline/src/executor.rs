//! Step runners and the sequential cell executor.
//!
//! Steps inside a cell run strictly in order; step N+1 starts only after
//! step N has finished. The first failing step aborts its cell unless the
//! step is marked `continue_on_error`. A failed cell does not stop the cells
//! after it.

use crate::cache;
use crate::plan::{CellPlan, JobPlan, PlannedStep, ResolvedAction, ResolvedStep};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Lines of stderr kept as a failed step's diagnostic.
const DIAGNOSTIC_LINES: usize = 20;

/// Errors that prevent a runner from executing a step at all.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    RemoveDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a runner reports for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    /// The action belongs to the hosting scheduler and was not run locally.
    Delegated,
}

/// Where and with which environment a step runs.
pub struct StepContext<'a> {
    pub workdir: &'a Path,
    pub env: &'a BTreeMap<String, String>,
}

/// Executes a single resolved step.
pub trait StepRunner {
    fn run(&mut self, step: &ResolvedStep, ctx: &StepContext<'_>) -> Result<StepStatus, ExecError>;
}

/// Runs `run` steps through `bash -e -o pipefail -c`, removes cache
/// directories natively and delegates `uses` actions.
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: "bash".to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run a script, echoing stdout and stderr line by line as they arrive
    /// and keeping the last lines of both as the failure diagnostic.
    fn run_script(&self, command: &str, ctx: &StepContext<'_>) -> Result<StepStatus, ExecError> {
        let spawn_error = |source: io::Error| ExecError::Spawn {
            program: self.shell.clone(),
            source,
        };
        let mut child = Command::new(&self.shell)
            .args(["-e", "-o", "pipefail", "-c", command])
            .current_dir(ctx.workdir)
            .envs(ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let tail = Mutex::new(VecDeque::with_capacity(DIAGNOSTIC_LINES));
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        thread::scope(|scope| {
            let tail = &tail;
            if let Some(stdout) = stdout {
                scope.spawn(move || tee(stdout, io::stdout(), tail));
            }
            if let Some(stderr) = stderr {
                scope.spawn(move || tee(stderr, io::stderr(), tail));
            }
        });
        let status = child.wait().map_err(spawn_error)?;

        if status.success() {
            return Ok(StepStatus::Succeeded);
        }

        let lines = tail.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(StepStatus::Failed {
            exit_code: status.code(),
            diagnostic: Vec::from(lines).join("\n"),
        })
    }
}

/// Copy `source` to `sink` line by line, pushing each line into the shared
/// diagnostic tail.
fn tee(source: impl Read, mut sink: impl Write, tail: &Mutex<VecDeque<String>>) {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    let mut echo = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Lost step output: {}", e);
                break;
            }
        }

        if echo {
            if let Err(e) = sink.write_all(&buf).and_then(|()| sink.flush()) {
                warn!("Cannot echo step output, capturing only: {}", e);
                echo = false;
            }
        }

        let line = String::from_utf8_lossy(&buf).trim_end_matches(['\n', '\r']).to_string();
        let mut tail = tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if tail.len() == DIAGNOSTIC_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl StepRunner for ShellRunner {
    fn run(&mut self, step: &ResolvedStep, ctx: &StepContext<'_>) -> Result<StepStatus, ExecError> {
        match &step.action {
            ResolvedAction::Run { command } => self.run_script(command, ctx),
            ResolvedAction::RemoveDir { path } => {
                let full = ctx.workdir.join(path);
                let removed =
                    cache::remove_stale_dir(&full).map_err(|source| ExecError::RemoveDir {
                        path: full.clone(),
                        source,
                    })?;
                debug!("Cache {} removed: {}", full.display(), removed);
                Ok(StepStatus::Succeeded)
            }
            ResolvedAction::Uses { action, .. } => {
                info!("'{}' is provided by the hosting scheduler", action);
                Ok(StepStatus::Delegated)
            }
        }
    }
}

/// Records what would run without touching the system.
#[derive(Default)]
pub struct DryRunner {
    log: Vec<String>,
}

impl DryRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }
}

impl StepRunner for DryRunner {
    fn run(&mut self, step: &ResolvedStep, _ctx: &StepContext<'_>) -> Result<StepStatus, ExecError> {
        self.log.push(format!("{}: {}", step.name, step.action));
        match step.action {
            ResolvedAction::Uses { .. } => Ok(StepStatus::Delegated),
            _ => Ok(StepStatus::Succeeded),
        }
    }
}

/// Final state of one step in a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Delegated,
    Skipped {
        condition: String,
    },
    Failed {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    /// Failed, but the step is `continue_on_error`.
    Warned {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    /// Not reached because an earlier step aborted the cell.
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CellStatus {
    Passed,
    Failed { step: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellReport {
    pub index: usize,
    pub label: String,
    pub steps: Vec<StepRecord>,
    pub status: CellStatus,
}

impl CellReport {
    pub fn passed(&self) -> bool {
        self.status == CellStatus::Passed
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|record| record.name == step)
            .map(|record| &record.outcome)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|record| matches!(record.outcome, StepOutcome::Warned { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub cells: Vec<CellReport>,
}

impl JobReport {
    pub fn success(&self) -> bool {
        self.cells.iter().all(CellReport::passed)
    }

    pub fn failed_cells(&self) -> impl Iterator<Item = &CellReport> {
        self.cells.iter().filter(|cell| !cell.passed())
    }
}

/// Runs cell plans one step at a time.
pub struct PipelineExecutor<R: StepRunner> {
    runner: R,
    workdir: PathBuf,
}

impl<R: StepRunner> PipelineExecutor<R> {
    pub fn new(runner: R, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Run every cell of a job, or only the cell at `only`.
    #[tracing::instrument(skip_all, fields(job = %plan.job_id))]
    pub fn run_job(&mut self, plan: &JobPlan, only: Option<usize>) -> JobReport {
        let cells = plan
            .cells
            .iter()
            .filter(|cell| only.is_none_or(|index| cell.index == index))
            .map(|cell| self.run_cell(cell))
            .collect::<Vec<_>>();

        let report = JobReport {
            job_id: plan.job_id.clone(),
            cells,
        };
        info!(
            "Job '{}' finished: {} of {} cells passed",
            report.job_id,
            report.cells.iter().filter(|c| c.passed()).count(),
            report.cells.len()
        );
        report
    }

    pub fn run_cell(&mut self, cell: &CellPlan) -> CellReport {
        let label = cell.label();
        info!("Running cell {}", label);

        let mut aborted_at: Option<String> = None;
        let mut records = Vec::with_capacity(cell.steps.len());

        for planned in &cell.steps {
            let name = planned.name().to_string();

            if aborted_at.is_some() {
                records.push(StepRecord {
                    name,
                    outcome: StepOutcome::NotRun,
                });
                continue;
            }

            let outcome = match planned {
                PlannedStep::Skipped { condition, .. } => {
                    debug!("Skipping '{}' ({})", name, condition);
                    StepOutcome::Skipped {
                        condition: condition.clone(),
                    }
                }
                PlannedStep::Active(step) => {
                    let outcome = self.run_step(cell, step);
                    if matches!(outcome, StepOutcome::Failed { .. }) {
                        aborted_at = Some(name.clone());
                    }
                    outcome
                }
            };

            records.push(StepRecord { name, outcome });
        }

        let status = match aborted_at {
            Some(step) => {
                error!("Cell {} failed at '{}'", label, step);
                CellStatus::Failed { step }
            }
            None => CellStatus::Passed,
        };

        CellReport {
            index: cell.index,
            label,
            steps: records,
            status,
        }
    }

    fn run_step(&mut self, cell: &CellPlan, step: &ResolvedStep) -> StepOutcome {
        info!("Step '{}'", step.name);
        let mut env = cell.env.clone();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        let ctx = StepContext {
            workdir: &self.workdir,
            env: &env,
        };

        let (exit_code, diagnostic) = match self.runner.run(step, &ctx) {
            Ok(StepStatus::Succeeded) => return StepOutcome::Succeeded,
            Ok(StepStatus::Delegated) => return StepOutcome::Delegated,
            Ok(StepStatus::Failed {
                exit_code,
                diagnostic,
            }) => (exit_code, diagnostic),
            Err(e) => (None, e.to_string()),
        };

        if step.continue_on_error {
            warn!(
                "Step '{}' failed (exit {:?}); continuing: {}",
                step.name, exit_code, diagnostic
            );
            StepOutcome::Warned {
                exit_code,
                diagnostic,
            }
        } else {
            error!("Step '{}' failed (exit {:?})", step.name, exit_code);
            StepOutcome::Failed {
                exit_code,
                diagnostic,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Planner;
    use crate::workflow::Workflow;

    /// Fails matching steps with a canned diagnostic and records every call.
    #[derive(Default)]
    struct ScriptedRunner {
        failures: Vec<(String, String, String)>,
        calls: Vec<String>,
    }

    impl ScriptedRunner {
        fn failing(step: &str, diagnostic: &str) -> Self {
            Self::default().fail_when(step, "", diagnostic)
        }

        /// Fail `step` only where its resolved action mentions `needle`.
        fn fail_when(mut self, step: &str, needle: &str, diagnostic: &str) -> Self {
            self.failures
                .push((step.to_string(), needle.to_string(), diagnostic.to_string()));
            self
        }
    }

    impl StepRunner for ScriptedRunner {
        fn run(
            &mut self,
            step: &ResolvedStep,
            _ctx: &StepContext<'_>,
        ) -> Result<StepStatus, ExecError> {
            self.calls.push(step.name.clone());
            let action = step.action.to_string();
            let failure = self
                .failures
                .iter()
                .find(|(name, needle, _)| *name == step.name && action.contains(needle.as_str()));
            match failure {
                Some((_, _, diagnostic)) => Ok(StepStatus::Failed {
                    exit_code: Some(1),
                    diagnostic: diagnostic.clone(),
                }),
                None => Ok(StepStatus::Succeeded),
            }
        }
    }

    fn reference_plan(job: &str) -> JobPlan {
        let workflow = Workflow::reference().unwrap();
        Planner::new(&workflow).plan_job(job).unwrap()
    }

    #[test]
    fn test_lint_stops_at_docstring_gate() {
        let plan = reference_plan("lint");
        let runner = ScriptedRunner::failing("interrogate", "RESULT: FAILED (minimum: 95.0%, actual: 93.1%)");
        let mut executor = PipelineExecutor::new(runner, ".");
        let report = executor.run_job(&plan, None);

        assert!(!report.success());
        let cell = &report.cells[0];
        assert_eq!(
            cell.status,
            CellStatus::Failed {
                step: "interrogate".into()
            }
        );
        for checker in ["flake8", "isort", "yapf"] {
            assert_eq!(cell.outcome(checker), Some(&StepOutcome::Succeeded));
        }
        match cell.outcome("interrogate") {
            Some(StepOutcome::Failed { diagnostic, .. }) => assert!(diagnostic.contains("93.1%")),
            other => panic!("Expected interrogate failure, got {:?}", other),
        }

        let calls = &executor.runner().calls;
        let checkers: Vec<_> = calls[calls.len() - 4..].iter().map(String::as_str).collect();
        assert_eq!(checkers, vec!["flake8", "isort", "yapf", "interrogate"]);
    }

    #[test]
    fn test_first_failing_checker_stops_the_job() {
        let plan = reference_plan("lint");
        let runner = ScriptedRunner::failing("isort", "ERROR: imports are incorrectly sorted");
        let mut executor = PipelineExecutor::new(runner, ".");
        let report = executor.run_job(&plan, None);

        let cell = &report.cells[0];
        assert_eq!(cell.outcome("flake8"), Some(&StepOutcome::Succeeded));
        assert_eq!(cell.outcome("yapf"), Some(&StepOutcome::NotRun));
        assert_eq!(cell.outcome("interrogate"), Some(&StepOutcome::NotRun));
        assert!(!executor.runner().calls.iter().any(|c| c == "yapf"));
    }

    #[test]
    fn test_upload_failure_is_not_fatal() {
        let plan = reference_plan("build_cuda101");
        let runner = ScriptedRunner::failing("Upload coverage to Codecov", "codecov: 503");
        let mut executor = PipelineExecutor::new(runner, ".");
        let report = executor.run_job(&plan, None);

        assert!(report.success());
        let warned: Vec<_> = report
            .cells
            .iter()
            .filter(|c| c.warnings().count() == 1)
            .collect();
        assert_eq!(warned.len(), 1);
        assert!(warned[0].label.contains("python-version=3.7"));
        assert!(warned[0].label.contains("torch=1.5.0+cu101"));
    }

    #[test]
    fn test_failed_cell_does_not_affect_siblings() {
        let plan = reference_plan("build_cuda101");
        let runner = ScriptedRunner::default().fail_when(
            "Install PyTorch",
            "torch==1.7.0+cu101",
            "ERROR: No matching distribution found",
        );
        let mut executor = PipelineExecutor::new(runner, ".");
        let report = executor.run_job(&plan, None);

        assert_eq!(report.cells.len(), 8);
        let failed: Vec<_> = report.failed_cells().map(|c| c.index).collect();
        assert_eq!(failed, vec![2, 6]);

        let cell = &report.cells[2];
        assert_eq!(
            cell.status,
            CellStatus::Failed {
                step: "Install PyTorch".into()
            }
        );
        assert_eq!(
            cell.outcome("Run unittests and generate coverage report"),
            Some(&StepOutcome::NotRun)
        );
        assert_eq!(
            report.cells[3].outcome("Run unittests and generate coverage report"),
            Some(&StepOutcome::Succeeded)
        );
    }

    #[test]
    fn test_single_cell_selection() {
        let plan = reference_plan("build_cuda101");
        let mut executor = PipelineExecutor::new(ScriptedRunner::default(), ".");
        let report = executor.run_job(&plan, Some(5));
        assert_eq!(report.cells.len(), 1);
        assert_eq!(report.cells[0].index, 5);
        assert!(report.success());
    }

    #[test]
    fn test_skipped_steps_are_reported_and_not_run() {
        let plan = reference_plan("build_cuda101");
        let mut executor = PipelineExecutor::new(ScriptedRunner::default(), ".");
        let report = executor.run_job(&plan, Some(0));
        assert_eq!(
            report.cells[0].outcome("Install Pillow"),
            Some(&StepOutcome::Skipped {
                condition: "matrix.torchvision < 0.5".into()
            })
        );
        assert!(!executor.runner().calls.iter().any(|c| c == "Install Pillow"));
    }

    #[test]
    fn test_dry_runner_records_resolved_commands() {
        let plan = reference_plan("build_cuda101");
        let mut executor = PipelineExecutor::new(DryRunner::new(), ".");
        let report = executor.run_job(&plan, Some(0));
        assert!(report.success());
        assert_eq!(report.cells[0].outcome("Checkout"), Some(&StepOutcome::Delegated));

        let log = executor.runner().log();
        assert!(log.iter().any(|l| l == "Remove stale build cache: remove_dir: .eggs"));
        assert!(log.iter().any(|l| l.contains("torch==1.5.0+cu101")));
    }

    #[test]
    fn test_shell_runner_runs_in_workdir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("CUDA_ARCH".to_string(), "7.0".to_string());
        let ctx = StepContext {
            workdir: dir.path(),
            env: &env,
        };
        let mut runner = ShellRunner::new();

        let ok = ResolvedStep {
            name: "write".into(),
            action: ResolvedAction::Run {
                command: "echo \"$CUDA_ARCH\" > arch.txt".into(),
            },
            env: BTreeMap::new(),
            continue_on_error: false,
        };
        assert_eq!(runner.run(&ok, &ctx).unwrap(), StepStatus::Succeeded);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("arch.txt")).unwrap().trim(),
            "7.0"
        );

        let failing = ResolvedStep {
            name: "fail".into(),
            action: ResolvedAction::Run {
                command: "echo broken >&2\nexit 3".into(),
            },
            env: BTreeMap::new(),
            continue_on_error: false,
        };
        assert_eq!(
            runner.run(&failing, &ctx).unwrap(),
            StepStatus::Failed {
                exit_code: Some(3),
                diagnostic: "broken".into()
            }
        );
    }

    fn script(command: &str) -> ResolvedStep {
        ResolvedStep {
            name: "script".into(),
            action: ResolvedAction::Run {
                command: command.into(),
            },
            env: BTreeMap::new(),
            continue_on_error: false,
        }
    }

    #[test]
    fn test_shell_runner_keeps_stdout_as_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::new();
        let ctx = StepContext {
            workdir: dir.path(),
            env: &env,
        };
        let step = script("echo 'RESULT: FAILED (minimum: 95.0%, actual: 93.1%)'\nexit 1");
        assert_eq!(
            ShellRunner::new().run(&step, &ctx).unwrap(),
            StepStatus::Failed {
                exit_code: Some(1),
                diagnostic: "RESULT: FAILED (minimum: 95.0%, actual: 93.1%)".into()
            }
        );
    }

    #[test]
    fn test_shell_runner_diagnostic_is_output_tail() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::new();
        let ctx = StepContext {
            workdir: dir.path(),
            env: &env,
        };
        let step = script("for i in $(seq 1 30); do echo \"line $i\"; done\nexit 2");
        match ShellRunner::new().run(&step, &ctx).unwrap() {
            StepStatus::Failed {
                exit_code,
                diagnostic,
            } => {
                assert_eq!(exit_code, Some(2));
                let lines: Vec<_> = diagnostic.lines().collect();
                assert_eq!(lines.len(), DIAGNOSTIC_LINES);
                assert_eq!(lines[0], "line 11");
                assert_eq!(lines[DIAGNOSTIC_LINES - 1], "line 30");
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_shell_runner_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::new();
        let ctx = StepContext {
            workdir: dir.path(),
            env: &env,
        };
        let step = script("echo 'E501 line too long'\necho 'flake8 exited' >&2\nexit 1");
        match ShellRunner::new().run(&step, &ctx).unwrap() {
            StepStatus::Failed { diagnostic, .. } => {
                assert!(diagnostic.contains("E501 line too long"));
                assert!(diagnostic.contains("flake8 exited"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_shell_runner_removes_cache_twice() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".eggs/stale")).unwrap();
        let env = BTreeMap::new();
        let ctx = StepContext {
            workdir: dir.path(),
            env: &env,
        };
        let step = ResolvedStep {
            name: "clean".into(),
            action: ResolvedAction::RemoveDir {
                path: PathBuf::from(".eggs"),
            },
            env: BTreeMap::new(),
            continue_on_error: false,
        };
        let mut runner = ShellRunner::new();
        assert_eq!(runner.run(&step, &ctx).unwrap(), StepStatus::Succeeded);
        assert!(!dir.path().join(".eggs").exists());
        assert_eq!(runner.run(&step, &ctx).unwrap(), StepStatus::Succeeded);
        assert!(!dir.path().join(".eggs").exists());
    }
}
