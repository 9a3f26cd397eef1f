//! Subcommand implementations.
//!
//! Each command writes its human-readable output to `out` so the binary can
//! pass stdout and tests can pass a buffer.

use crate::errors::AppError;
use detci_pipeline::{
    CellReport, DryRunner, JobPlan, JobReport, PipelineExecutor, PlannedStep, Planner,
    ShellRunner, StepOutcome, StepRunner, Workflow,
};
use detci_vis::{ResultFiles, SegLabels, load_boxes_json, load_points_from_ply};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use tracing::{info, warn};

/// Load the descriptor at `path`, or the bundled mmdet3d one.
pub fn load_workflow(path: Option<&Path>) -> Result<Workflow, AppError> {
    let workflow = match path {
        Some(path) => Workflow::load(path)?,
        None => {
            info!("No --workflow given, using the bundled mmdet3d descriptor");
            Workflow::reference()?
        }
    };
    Ok(workflow)
}

fn write_plan(out: &mut impl Write, plan: &JobPlan) -> Result<(), AppError> {
    writeln!(
        out,
        "job {} on {} ({} cells)",
        plan.job_id,
        plan.runs_on,
        plan.cells.len()
    )?;
    for cell in &plan.cells {
        writeln!(out, "  cell {}", cell.label())?;
        for step in &cell.steps {
            match step {
                PlannedStep::Active(resolved) => {
                    writeln!(out, "    + {}: {}", resolved.name, resolved.action)?
                }
                PlannedStep::Skipped { name, condition } => {
                    writeln!(out, "    - {} (skipped: {})", name, condition)?
                }
            }
        }
    }
    Ok(())
}

pub fn plan(
    out: &mut impl Write,
    workflow: &Workflow,
    job: Option<&str>,
    json: bool,
) -> Result<Vec<JobPlan>, AppError> {
    let planner = Planner::new(workflow);
    let plans = match job {
        Some(id) => vec![planner.plan_job(id)?],
        None => planner.plan_all()?,
    };

    if json {
        serde_json::to_writer_pretty(&mut *out, &plans)?;
        writeln!(out)?;
    } else {
        for plan in &plans {
            write_plan(out, plan)?;
        }
    }
    Ok(plans)
}

/// Report every configuration hazard. Fails if there is at least one.
pub fn check(out: &mut impl Write, workflow: &Workflow) -> Result<(), AppError> {
    let hazards = Planner::new(workflow).validate();
    for hazard in &hazards {
        warn!("{}", hazard);
        writeln!(out, "error: {}", hazard)?;
    }
    if !hazards.is_empty() {
        return Err(AppError::Invalid(hazards.len()));
    }

    writeln!(
        out,
        "workflow '{}' ok: {} jobs, triggered by {}",
        workflow.name,
        workflow.jobs.len(),
        workflow.on.join(", ")
    )?;
    Ok(())
}

fn write_cell_report(out: &mut impl Write, cell: &CellReport) -> Result<(), AppError> {
    let verdict = if cell.passed() { "passed" } else { "FAILED" };
    writeln!(out, "cell {} {}", cell.label, verdict)?;
    for record in &cell.steps {
        match &record.outcome {
            StepOutcome::Succeeded => writeln!(out, "  ok      {}", record.name)?,
            StepOutcome::Delegated => writeln!(out, "  extern  {}", record.name)?,
            StepOutcome::Skipped { condition } => {
                writeln!(out, "  skip    {} ({})", record.name, condition)?
            }
            StepOutcome::Failed {
                exit_code,
                diagnostic,
            } => writeln!(
                out,
                "  fail    {} (exit {}): {}",
                record.name,
                exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                diagnostic
            )?,
            StepOutcome::Warned {
                exit_code,
                diagnostic,
            } => writeln!(
                out,
                "  warn    {} (exit {}): {}",
                record.name,
                exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                diagnostic
            )?,
            StepOutcome::NotRun => writeln!(out, "  -       {}", record.name)?,
        }
    }
    Ok(())
}

fn execute<R: StepRunner>(runner: R, workdir: &Path, plan: &JobPlan, cell: Option<usize>) -> JobReport {
    PipelineExecutor::new(runner, workdir).run_job(plan, cell)
}

/// Run one job, or one cell of it. Fails if any executed cell failed.
pub fn run(
    out: &mut impl Write,
    workflow: &Workflow,
    job: &str,
    cell: Option<usize>,
    workdir: &Path,
    dry_run: bool,
) -> Result<JobReport, AppError> {
    let plan = Planner::new(workflow).plan_job(job)?;
    if let Some(index) = cell.filter(|&i| !plan.cells.iter().any(|c| c.index == i)) {
        return Err(AppError::UnknownCell {
            job: job.to_string(),
            index,
            count: plan.cells.len(),
        });
    }

    let report = if dry_run {
        execute(DryRunner::new(), workdir, &plan, cell)
    } else {
        execute(ShellRunner::new(), workdir, &plan, cell)
    };

    for cell in &report.cells {
        write_cell_report(out, cell)?;
    }

    let failed = report.failed_cells().count();
    if failed > 0 {
        return Err(AppError::JobFailed {
            job: report.job_id.clone(),
            failed,
        });
    }
    Ok(report)
}

/// Export a point cloud with optional ground-truth and predicted boxes.
pub fn export(
    points: &Path,
    gt: Option<&Path>,
    pred: Option<&Path>,
    out_dir: &Path,
    name: &str,
) -> Result<ResultFiles, AppError> {
    let points = load_points_from_ply(points)?;
    let gt = gt.map(load_boxes_json).transpose()?;
    let pred = pred.map(load_boxes_json).transpose()?;
    let files = detci_vis::show_result(
        Some(points.as_slice()),
        gt.as_deref(),
        pred.as_deref(),
        out_dir,
        name,
    )?;
    Ok(files)
}

fn read_labels(path: &Path) -> Result<Vec<u32>, AppError> {
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

/// Export a point cloud colored by per-point class labels.
pub fn export_seg(
    points: &Path,
    gt: Option<&Path>,
    pred: Option<&Path>,
    palette: &Path,
    ignore_index: Option<u32>,
    out_dir: &Path,
    name: &str,
) -> Result<ResultFiles, AppError> {
    let points = load_points_from_ply(points)?;
    let gt = gt.map(read_labels).transpose()?;
    let pred = pred.map(read_labels).transpose()?;
    let palette: Vec<[u8; 3]> = serde_json::from_reader(BufReader::new(File::open(palette)?))?;

    let labels = SegLabels {
        gt: gt.as_deref(),
        pred: pred.as_deref(),
        ignore_index,
    };
    let files = detci_vis::show_seg_result(&points, labels, &palette, out_dir, name)?;
    Ok(files)
}
