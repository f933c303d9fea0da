//! CLI argument parsing via `clap`.

use clap::{Args, Parser, Subcommand};

use crate::config::Overrides;

#[derive(Parser)]
#[command(
    name = "testrun",
    version,
    about = "Run the test suite with coverage, then lint",
    long_about = "testrun — erase coverage, start the HTTP fixture server, run the tests against it, render the coverage report and lint the sources.\n\nConfiguration precedence: CLI > testrun.toml > defaults.",
    after_help = "Examples:\n  testrun run\n  testrun run --skip coverage-report --output json\n  testrun lint --strict\n  testrun steps --only tests",
    arg_required_else_help = true
)]
/// Top-level CLI options and subcommands.
pub struct Cli {
    /// Log debug events (RUST_LOG takes precedence)
    #[arg(short, long, global = true, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Args, Clone, Default)]
/// Options shared by the subcommands that resolve a configuration.
pub struct CommonOpts {
    #[arg(long, help = "Repository root (default: current dir)")]
    pub repo_root: Option<String>,
    #[arg(long, help = "Config file (default: testrun.toml|yaml|yml at the root)")]
    pub config: Option<String>,
    #[arg(long, help = "Output mode: human|json (default: human)")]
    pub output: Option<String>,
    #[arg(long, action = clap::ArgAction::SetTrue, help = "Exit non-zero when any file misses the maximum lint score")]
    pub strict: bool,
}

#[derive(Subcommand)]
/// Supported subcommands.
pub enum Commands {
    /// Show version
    #[command(about = "Show version", long_about = "Print the current testrun version.")]
    Version,
    /// Run the whole pipeline
    #[command(
        about = "Run tests, coverage and lint",
        long_about = "Run erase-coverage, tests, coverage-report and lint in order. A failing test run stops the pipeline and its exit status becomes ours.",
        after_help = "Examples:\n  testrun run\n  testrun run --only tests --only coverage-report"
    )]
    Run {
        #[command(flatten)]
        common: CommonOpts,
        #[arg(long, value_name = "STEP", help = "Run only these steps (repeatable)")]
        only: Vec<String>,
        #[arg(long, value_name = "STEP", help = "Skip these steps (repeatable)")]
        skip: Vec<String>,
    },
    /// Lint only
    #[command(
        about = "Lint sources",
        long_about = "Lint every matching file under the configured directories and list the files that miss the maximum score."
    )]
    Lint {
        #[command(flatten)]
        common: CommonOpts,
    },
    /// List pipeline steps
    #[command(
        about = "List steps",
        long_about = "List the pipeline steps in order and whether they are enabled."
    )]
    Steps {
        #[command(flatten)]
        common: CommonOpts,
        #[arg(long, value_name = "STEP")]
        only: Vec<String>,
        #[arg(long, value_name = "STEP")]
        skip: Vec<String>,
    },
}

impl CommonOpts {
    pub fn overrides(&self, only: &[String], skip: &[String]) -> Overrides {
        Overrides {
            repo_root: self.repo_root.clone(),
            config: self.config.clone(),
            output: self.output.clone(),
            strict: if self.strict { Some(true) } else { None },
            only: only.to_vec(),
            skip: skip.to_vec(),
        }
    }
}
