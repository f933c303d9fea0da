//! Output rendering for lint results, run outcomes and the step list.
//!
//! Supports `human` (default) and `json` outputs. Progress markers go to
//! stderr so stdout only carries the summary.

use crate::models::{LintReport, Step};
use crate::pipeline::RunOutcome;
use owo_colors::OwoColorize;
use serde_json::json;
use serde_json::Value as JsonVal;
use std::collections::BTreeSet;
use std::io::Write;

fn use_colors(output: &str) -> bool {
    output != "json" && std::env::var_os("NO_COLOR").is_none()
}

/// Emit one progress marker for a completed file (human mode only).
pub fn progress_marker(output: &str) {
    if output == "json" {
        return;
    }
    let mut err = std::io::stderr().lock();
    let _ = write!(err, ".");
    let _ = err.flush();
}

/// Render the imperfect files: a blank line, one `<path>: <score line>` line
/// per file, and a closing blank line.
pub fn render_lint_human(res: &LintReport, color: bool) -> String {
    let mut out = String::from("\n");
    for v in &res.failures {
        let line = v.score_line.as_deref().unwrap_or_default();
        if color {
            out.push_str(&format!("{}: {}\n", v.file.bold(), line.red()));
        } else {
            out.push_str(&format!("{}: {}\n", v.file, line));
        }
    }
    out.push('\n');
    out
}

/// Print lint results in the requested format.
pub fn print_lint(res: &LintReport, output: &str) {
    match output {
        "json" => println!(
            "{}",
            serde_json::to_string_pretty(&compose_lint_json(res)).unwrap_or_default()
        ),
        _ => {
            // Finish the progress-marker line.
            eprintln!();
            print!("{}", render_lint_human(res, use_colors(output)));
        }
    }
}

/// Print the outcome of a full run. Human mode only prints the lint summary;
/// step progress is already in the log.
pub fn print_run(outcome: &RunOutcome, output: &str) {
    match output {
        "json" => println!(
            "{}",
            serde_json::to_string_pretty(&compose_run_json(outcome)).unwrap_or_default()
        ),
        _ => {
            if let Some(report) = &outcome.lint {
                print_lint(report, output);
            }
        }
    }
}

/// Print pipeline steps in order with their enabled state.
pub fn print_steps(enabled: &BTreeSet<Step>, output: &str) {
    match output {
        "json" => {
            let items: Vec<_> = Step::ALL
                .iter()
                .map(|s| json!({"step": s.name(), "enabled": enabled.contains(s)}))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&items).unwrap_or_default()
            );
        }
        _ => {
            let color = use_colors(output);
            for s in Step::ALL {
                let on = enabled.contains(&s);
                match (on, color) {
                    (true, true) => println!("{} {}", "●".green(), s.name()),
                    (false, true) => println!("{} {}", "○".bright_black(), s.name().bright_black()),
                    (true, false) => println!("* {}", s.name()),
                    (false, false) => println!("  {} (skipped)", s.name()),
                }
            }
        }
    }
}

/// Compose lint JSON object (pure) for testing/snapshot purposes.
pub fn compose_lint_json(res: &LintReport) -> JsonVal {
    serde_json::to_value(res).unwrap_or(JsonVal::Null)
}

/// Compose run JSON object (pure) for testing/snapshot purposes.
pub fn compose_run_json(outcome: &RunOutcome) -> JsonVal {
    json!({
        "steps": outcome.steps,
        "lint": outcome.lint.as_ref().map(compose_lint_json),
        "error": outcome.error,
        "exit_code": outcome.exit_code,
    })
}
