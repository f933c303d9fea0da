//! testrun CLI binary entry point.
//! Resolves configuration, delegates to the library, and prints results.

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;
use testrun::cli::{Cli, Commands};
use testrun::server::{install_signal_handler, ServerSlot};
use testrun::{config, lint, output, pipeline};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "testrun=debug" } else { "testrun=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
        Commands::Run { common, only, skip } => {
            let eff = config::resolve_effective(&common.overrides(&only, &skip))
                .context("resolving configuration")?;
            if eff.config_path.is_none() {
                tracing::info!("no testrun.toml found; using defaults");
            }
            let slot = ServerSlot::default();
            install_signal_handler(slot.clone()).context("installing signal handler")?;
            let out = eff.output.clone();
            let outcome = pipeline::run(&eff, &slot, &|_| output::progress_marker(&out))?;
            output::print_run(&outcome, &eff.output);
            Ok(outcome.exit_code)
        }
        Commands::Lint { common } => {
            let eff = config::resolve_effective(&common.overrides(&[], &[]))
                .context("resolving configuration")?;
            let out = eff.output.clone();
            let report = lint::run_lint(&eff.lint, &eff.repo_root, &|_| {
                output::progress_marker(&out)
            })?;
            output::print_lint(&report, &eff.output);
            Ok(if eff.strict && !report.failures.is_empty() {
                1
            } else {
                0
            })
        }
        Commands::Steps { common, only, skip } => {
            let eff = config::resolve_effective(&common.overrides(&only, &skip))
                .context("resolving configuration")?;
            output::print_steps(&eff.steps, &eff.output);
            Ok(0)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            std::process::exit(2);
        }
    }
}
