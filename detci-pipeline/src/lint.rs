//! Lint checkers.
//!
//! The lint job runs its checkers in a fixed order: style, import order,
//! format, docstring coverage. Each checker becomes one `run` step, so the
//! first failing checker stops the job and earlier results stand.

use crate::error::PlanError;
use crate::workflow::StepSpec;
use serde::{Deserialize, Serialize};

fn default_fail_under() -> u8 {
    95
}

/// Docstring-coverage gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocstringGate {
    pub package: String,
    #[serde(default = "default_fail_under")]
    pub fail_under: u8,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub ignore_regex: Vec<String>,
    #[serde(default)]
    pub ignore_init_method: bool,
    #[serde(default)]
    pub ignore_module: bool,
    #[serde(default)]
    pub ignore_nested_functions: bool,
}

impl DocstringGate {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            fail_under: default_fail_under(),
            exclude: Vec::new(),
            ignore_regex: Vec::new(),
            ignore_init_method: false,
            ignore_module: false,
            ignore_nested_functions: false,
        }
    }

    fn command(&self) -> String {
        let mut args = vec!["interrogate".to_string(), "-v".to_string()];
        if self.ignore_init_method {
            args.push("--ignore-init-method".to_string());
        }
        if self.ignore_module {
            args.push("--ignore-module".to_string());
        }
        if self.ignore_nested_functions {
            args.push("--ignore-nested-functions".to_string());
        }
        for path in &self.exclude {
            args.push(format!("--exclude {}", path));
        }
        for regex in &self.ignore_regex {
            args.push(format!("--ignore-regex \"{}\"", regex));
        }
        args.push(format!("--fail-under {}", self.fail_under));
        args.push(self.package.clone());
        args.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Checker {
    Style {
        #[serde(default)]
        paths: Vec<String>,
    },
    ImportOrder {
        #[serde(default)]
        paths: Vec<String>,
    },
    Format {
        #[serde(default)]
        paths: Vec<String>,
    },
    DocstringCoverage(DocstringGate),
}

impl Checker {
    pub fn name(&self) -> &'static str {
        match self {
            Checker::Style { .. } => "flake8",
            Checker::ImportOrder { .. } => "isort",
            Checker::Format { .. } => "yapf",
            Checker::DocstringCoverage(_) => "interrogate",
        }
    }

    /// Position in the canonical checker order.
    fn rank(&self) -> u8 {
        match self {
            Checker::Style { .. } => 0,
            Checker::ImportOrder { .. } => 1,
            Checker::Format { .. } => 2,
            Checker::DocstringCoverage(_) => 3,
        }
    }

    /// Check-only command line. None of these rewrite the source tree.
    pub fn command(&self) -> String {
        fn with_paths(base: &str, paths: &[String]) -> String {
            if paths.is_empty() {
                base.to_string()
            } else {
                format!("{} {}", base, paths.join(" "))
            }
        }

        match self {
            Checker::Style { paths } => with_paths("flake8", paths),
            Checker::ImportOrder { paths } => {
                with_paths("isort --recursive --check-only --diff", paths)
            }
            Checker::Format { paths } => with_paths("yapf -r -d", paths),
            Checker::DocstringCoverage(gate) => gate.command(),
        }
    }

    pub fn to_step(&self) -> StepSpec {
        StepSpec::run(self.name(), self.command())
    }
}

/// Reject checker lists that break the canonical order.
pub fn check_order(job: &str, checkers: &[Checker]) -> Result<(), PlanError> {
    for pair in checkers.windows(2) {
        if pair[1].rank() <= pair[0].rank() {
            return Err(PlanError::LintOrder {
                job: job.to_string(),
                found: pair[1].name().to_string(),
                after: pair[0].name().to_string(),
            });
        }
    }
    Ok(())
}
