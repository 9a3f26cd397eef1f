//! detci
//!
//! Command line front end for matrix-driven CI pipelines.
//!
//! Commands:
//! - `plan`: expand every job into per-cell step sequences
//! - `check`: report configuration hazards before anything runs
//! - `run`: execute a job locally, one cell at a time
//! - `export` / `export-seg`: write meshlab-readable OBJ results

mod commands;
mod errors;

use clap::{Parser, Subcommand};
use errors::AppError;
use std::io::Write;
use std::path::PathBuf;

/// detci - matrix CI planner and runner
#[derive(Parser, Debug)]
#[command(name = "detci")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the expanded plan
    Plan {
        /// Workflow descriptor (defaults to the bundled mmdet3d workflow)
        #[arg(short, long)]
        workflow: Option<PathBuf>,

        /// Only plan this job
        #[arg(short, long)]
        job: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate the workflow without running anything
    Check {
        #[arg(short, long)]
        workflow: Option<PathBuf>,
    },

    /// Run a job locally
    Run {
        #[arg(short, long)]
        workflow: Option<PathBuf>,

        #[arg(short, long)]
        job: String,

        /// Only run the cell with this index
        #[arg(short, long)]
        cell: Option<usize>,

        /// Directory the steps run in
        #[arg(long, default_value = ".")]
        workdir: PathBuf,

        /// Log the resolved steps instead of executing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Export points and 3D boxes as OBJ files
    Export {
        /// PLY point cloud
        #[arg(long)]
        points: PathBuf,

        /// Ground-truth boxes, JSON rows of [x, y, z, dx, dy, dz, heading]
        #[arg(long)]
        gt: Option<PathBuf>,

        /// Predicted boxes, same layout as --gt
        #[arg(long)]
        pred: Option<PathBuf>,

        #[arg(long)]
        out_dir: PathBuf,

        /// Frame name, used for the result directory and file prefixes
        #[arg(long)]
        name: String,
    },

    /// Export points colored by segmentation labels as OBJ files
    ExportSeg {
        #[arg(long)]
        points: PathBuf,

        /// Ground-truth labels, a JSON array with one class id per point
        #[arg(long)]
        gt: Option<PathBuf>,

        /// Predicted labels, same layout as --gt
        #[arg(long)]
        pred: Option<PathBuf>,

        /// JSON array of [r, g, b] colors indexed by class id
        #[arg(long)]
        palette: PathBuf,

        /// Drop points whose ground-truth label equals this
        #[arg(long)]
        ignore_index: Option<u32>,

        #[arg(long)]
        out_dir: PathBuf,

        #[arg(long)]
        name: String,
    },
}

fn init_logging(level: &str) {
    #[cfg(feature = "tracy")]
    {
        use tracing_subscriber::Layer;
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        tracing_subscriber::registry()
            .with(tracing_tracy::TracyLayer::default())
            .with(
                tracing_subscriber::fmt::layer().with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
                ),
            )
            .init();
    }

    #[cfg(not(feature = "tracy"))]
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

fn dispatch(command: Command) -> Result<(), AppError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match command {
        Command::Plan {
            workflow,
            job,
            json,
        } => {
            let workflow = commands::load_workflow(workflow.as_deref())?;
            commands::plan(&mut out, &workflow, job.as_deref(), json)?;
        }
        Command::Check { workflow } => {
            let workflow = commands::load_workflow(workflow.as_deref())?;
            commands::check(&mut out, &workflow)?;
        }
        Command::Run {
            workflow,
            job,
            cell,
            workdir,
            dry_run,
        } => {
            let workflow = commands::load_workflow(workflow.as_deref())?;
            commands::run(&mut out, &workflow, &job, cell, &workdir, dry_run)?;
        }
        Command::Export {
            points,
            gt,
            pred,
            out_dir,
            name,
        } => {
            let files = commands::export(&points, gt.as_deref(), pred.as_deref(), &out_dir, &name)?;
            writeln!(out, "{}", files.dir.display())?;
        }
        Command::ExportSeg {
            points,
            gt,
            pred,
            palette,
            ignore_index,
            out_dir,
            name,
        } => {
            let files = commands::export_seg(
                &points,
                gt.as_deref(),
                pred.as_deref(),
                &palette,
                ignore_index,
                &out_dir,
                &name,
            )?;
            writeln!(out, "{}", files.dir.display())?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    if let Err(e) = dispatch(args.command) {
        eprintln!("detci error: {}", e);
        std::process::exit(1);
    }
}
