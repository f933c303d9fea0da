//! The test-run pipeline: erase coverage, run the tests against the fixture
//! server, render the coverage report, lint.
//!
//! A failing test step short-circuits the run: no report, no lint, and the
//! run exits with the test tool's status. A failing coverage tool is logged
//! and recorded but the run carries on to lint. The fixture server only
//! lives for the duration of the test step.

use serde::Serialize;

use crate::command::{run_status, CommandSpec};
use crate::config::Effective;
use crate::error::{Error, Result};
use crate::lint;
use crate::models::{FileVerdict, LintReport, Step};
use crate::server::{FixtureServer, ServerSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Ran,
    Skipped,
    Failed,
    /// An earlier step failed.
    NotReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
}

impl StepRecord {
    pub fn ran(step: Step) -> Self {
        StepRecord {
            step,
            status: StepStatus::Ran,
        }
    }

    pub fn failed(step: Step) -> Self {
        StepRecord {
            step,
            status: StepStatus::Failed,
        }
    }

    fn with(step: Step, status: StepStatus) -> Self {
        StepRecord { step, status }
    }
}

#[derive(Debug, Clone, Serialize)]
/// What a run did and how the process should exit.
pub struct RunOutcome {
    pub steps: Vec<StepRecord>,
    pub lint: Option<LintReport>,
    /// Why the test step failed, when it did.
    pub error: Option<String>,
    pub exit_code: i32,
}

impl RunOutcome {
    pub fn status_of(&self, step: Step) -> Option<StepStatus> {
        self.steps.iter().find(|r| r.step == step).map(|r| r.status)
    }
}

/// Run a coverage tool. An empty argv is a configuration error and is
/// returned; the tool failing is only reported through the step status.
fn run_coverage(argv: &[String], what: &'static str, eff: &Effective) -> Result<StepStatus> {
    let spec = CommandSpec::from_argv(argv, what)?.cwd(&eff.repo_root);
    match run_status(&spec) {
        Ok(()) => Ok(StepStatus::Ran),
        Err(e) => {
            tracing::error!(error = %e, "coverage tool failed; continuing");
            Ok(StepStatus::Failed)
        }
    }
}

/// Start the fixture server, run the tests against it, and stop it again on
/// every path out of this function.
pub fn run_tests(eff: &Effective, slot: &ServerSlot) -> Result<()> {
    let url = eff.server.base_url();
    let server_spec =
        CommandSpec::from_argv(&eff.server.command, "server.command")?.cwd(&eff.repo_root);
    let tests_spec = CommandSpec::from_argv(&eff.tests.command, "tests.command")?
        .cwd(&eff.repo_root)
        .env(eff.server.url_env.clone(), url.clone())
        .timeout(eff.tests.timeout);

    let server = FixtureServer::spawn(&server_spec, url, slot.clone())?;
    if eff.server.ready {
        server.wait_ready(eff.server.ready_timeout, eff.server.ready_interval)?;
    } else {
        tracing::warn!(url = server.url(), "readiness check disabled");
    }
    let result = run_status(&tests_spec);
    server.shutdown();
    result
}

/// Run every enabled step in order.
///
/// Errors from the test step become the outcome's exit status. Coverage tool
/// failures mark their step as failed. Configuration errors and a linter that
/// cannot run are returned.
pub fn run(
    eff: &Effective,
    slot: &ServerSlot,
    progress: &(dyn Fn(&FileVerdict) + Sync),
) -> Result<RunOutcome> {
    tracing::info!(root = %eff.repo_root.display(), steps = ?eff.steps, "starting run");
    let mut outcome = RunOutcome {
        steps: Vec::new(),
        lint: None,
        error: None,
        exit_code: 0,
    };
    let mut halted = false;

    for step in Step::ALL {
        if halted {
            outcome
                .steps
                .push(StepRecord::with(step, StepStatus::NotReached));
            continue;
        }
        if !eff.steps.contains(&step) {
            tracing::info!(step = %step, "skipping step");
            outcome.steps.push(StepRecord::with(step, StepStatus::Skipped));
            continue;
        }
        let span = tracing::info_span!("step", name = %step);
        let _enter = span.enter();
        tracing::info!("running step");
        let status = match step {
            Step::EraseCoverage => run_coverage(&eff.coverage_erase, "coverage.erase", eff)?,
            Step::Tests => {
                if let Err(e) = run_tests(eff, slot) {
                    tracing::error!(error = %e, "tests failed; halting");
                    outcome.exit_code = test_exit_code(&e);
                    outcome.error = Some(e.to_string());
                    outcome.steps.push(StepRecord::failed(step));
                    halted = true;
                    continue;
                }
                StepStatus::Ran
            }
            Step::CoverageReport => {
                run_coverage(&eff.coverage_report, "coverage.report", eff)?
            }
            Step::Lint => {
                let report = lint::run_lint(&eff.lint, &eff.repo_root, progress)?;
                tracing::info!(
                    files = report.summary.files,
                    failures = report.summary.failures,
                    "lint finished"
                );
                if eff.strict && !report.failures.is_empty() {
                    outcome.exit_code = 1;
                }
                outcome.lint = Some(report);
                StepStatus::Ran
            }
        };
        outcome.steps.push(StepRecord::with(step, status));
    }

    tracing::info!(exit_code = outcome.exit_code, "done");
    Ok(outcome)
}

fn test_exit_code(e: &Error) -> i32 {
    match e.exit_code() {
        Some(code) if code != 0 => code,
        _ => 1,
    }
}
