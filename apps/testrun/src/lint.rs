//! Lint pass: discover source files, run the linter on each, and classify
//! each file by whether it reached the maximum score.
//!
//! Produces a `LintReport` with per-file verdicts and the imperfect files in
//! discovery order. The linter's exit code is ignored; only the reported
//! score matters.

use crate::command::{run_captured, Captured, CommandSpec};
use crate::config::{LintSettings, ScoreFormat};
use crate::error::{Error, Result};
use crate::models::{FileVerdict, LintReport};
use glob::glob;
use rayon::prelude::*;
use regex::Regex;
use serde_json::Value as Json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Score line recorded when the linter printed no rating at all.
pub const NO_SCORE: &str = "<no score reported>";

static SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s*/\s*(\d+(?:\.\d+)?)").expect("valid regex"));

/// List files ending in `.<extension>` below each of `dirs` (relative to
/// `root`). Each directory's files are sorted; directories keep their order
/// and a file reachable from two directories is listed once.
pub fn discover(root: &Path, dirs: &[String], extension: &str) -> Result<Vec<PathBuf>> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut files: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        let base = root.join(dir);
        let pattern = format!(
            "{}/**/*.{}",
            glob::Pattern::escape(&base.to_string_lossy()),
            glob::Pattern::escape(extension)
        );
        let entries = glob(&pattern).map_err(|source| Error::Glob {
            pattern: pattern.clone(),
            source,
        })?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable path");
                    None
                }
            })
            .filter(|p| p.is_file())
            .collect();
        found.sort();
        for p in found {
            if seen.insert(p.clone()) {
                files.push(p);
            }
        }
    }
    Ok(files)
}

/// Path shown to users: relative to `root` when possible.
pub fn display_path(root: &Path, path: &Path) -> String {
    pathdiff::diff_paths(path, root)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

/// Classify textual linter output by its rating line.
///
/// The first line containing `phrase` is the score line. The file is perfect
/// when the text right after the phrase starts with the `perfect` sentinel,
/// or when the parsed `<score>/<max>` reaches `max_score`.
pub fn parse_text(output: &str, cfg: &LintSettings) -> (Option<f64>, Option<String>, bool) {
    let Some(line) = output.lines().find(|l| l.contains(&cfg.phrase)) else {
        return (None, None, false);
    };
    let line = line.trim();
    let after = line
        .split_once(cfg.phrase.as_str())
        .map(|(_, rest)| rest.trim_start())
        .unwrap_or(line);
    let score = SCORE_RE
        .captures(after)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());
    let perfect = after.starts_with(&cfg.perfect) || score.is_some_and(|s| s >= cfg.max_score);
    (score, Some(line.to_string()), perfect)
}

/// Read `statistics.score` from a pylint `json2` report.
pub fn parse_json(stdout: &str) -> Option<f64> {
    let json: Json = serde_json::from_str(stdout).ok()?;
    json.get("statistics")?.get("score")?.as_f64()
}

fn classify(file: String, captured: &Captured, cfg: &LintSettings) -> FileVerdict {
    if cfg.format == ScoreFormat::Json {
        if let Some(score) = parse_json(&captured.stdout) {
            return FileVerdict {
                file,
                score: Some(score),
                score_line: Some(format!(
                    "{} {:.2}/{}",
                    cfg.phrase, score, cfg.max_score
                )),
                perfect: score >= cfg.max_score,
            };
        }
        tracing::debug!(file = %file, "linter output is not json2; scanning text");
    }
    let (score, score_line, perfect) = parse_text(&captured.combined(), cfg);
    if score_line.is_none() {
        tracing::warn!(file = %file, code = ?captured.code, "linter reported no score");
    }
    FileVerdict {
        file,
        score,
        score_line: Some(score_line.unwrap_or_else(|| NO_SCORE.to_string())),
        perfect,
    }
}

/// Run the linter on one file. Failing to run the linter at all is an error;
/// a low score or a missing rating is a verdict.
pub fn lint_file(cfg: &LintSettings, root: &Path, path: &Path) -> Result<FileVerdict> {
    let mut spec = CommandSpec::from_argv(&cfg.command, "lint.command")?
        .cwd(root)
        .timeout(cfg.timeout)
        .output_timeout(cfg.output_timeout);
    if cfg.format == ScoreFormat::Json {
        for a in &cfg.json_args {
            spec = spec.arg(a.clone());
        }
    }
    let spec = spec.arg(path.to_string_lossy());
    let captured = run_captured(&spec).map_err(|source| Error::Linter {
        file: path.to_path_buf(),
        source: Box::new(source),
    })?;
    let verdict = classify(display_path(root, path), &captured, cfg);
    tracing::debug!(file = %verdict.file, score = ?verdict.score, perfect = verdict.perfect, "linted");
    Ok(verdict)
}

/// Lint every discovered file, calling `progress` as each one completes.
pub fn run_lint(
    cfg: &LintSettings,
    root: &Path,
    progress: &(dyn Fn(&FileVerdict) + Sync),
) -> Result<LintReport> {
    let files = discover(root, &cfg.dirs, &cfg.extension)?;
    tracing::info!(files = files.len(), dirs = ?cfg.dirs, "linting");
    let verdicts: Vec<FileVerdict> = files
        .par_iter()
        .map(|path| {
            let v = lint_file(cfg, root, path)?;
            progress(&v);
            Ok(v)
        })
        .collect::<Result<_>>()?;
    Ok(LintReport::from_verdicts(verdicts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, "x = 1\n").unwrap();
    }

    #[test]
    fn test_discover_sorted_per_dir_and_filtered() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(root, "tests/test_b.py");
        touch(root, "tests/sub/test_a.py");
        touch(root, "tests/data.json");
        touch(root, "lib/core.py");
        let files = discover(root, &["tests".into(), "lib".into(), "missing".into()], "py").unwrap();
        let rel: Vec<String> = files.iter().map(|p| display_path(root, p)).collect();
        assert_eq!(rel, ["tests/sub/test_a.py", "tests/test_b.py", "lib/core.py"]);
    }

    #[test]
    fn test_discover_dedups_overlapping_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(root, "pkg/tests/t.py");
        let files = discover(root, &["pkg".into(), "pkg/tests".into()], "py").unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_parse_text_perfect_and_imperfect() {
        let cfg = LintSettings::default();
        let perfect = "\n------\nYour code has been rated at 10.00/10 (previous run: 9.80/10, +0.20)\n";
        let (score, line, ok) = parse_text(perfect, &cfg);
        assert_eq!(score, Some(10.0));
        assert!(ok);
        assert!(line.unwrap().starts_with("Your code has been rated at 10.00/10"));

        // The previous-run figure must not count as the sentinel.
        let regressed = "Your code has been rated at 9.50/10 (previous run: 10.00/10, -0.50)";
        let (score, _, ok) = parse_text(regressed, &cfg);
        assert_eq!(score, Some(9.5));
        assert!(!ok);

        let negative = "Your code has been rated at -2.50/10";
        assert_eq!(parse_text(negative, &cfg).0, Some(-2.5));
        assert_eq!(parse_text("no rating here", &cfg), (None, None, false));
    }

    #[test]
    fn test_parse_json_score() {
        let out = r#"{"messages": [], "statistics": {"score": 8.25, "modulesLinted": 1}}"#;
        assert_eq!(parse_json(out), Some(8.25));
        assert_eq!(parse_json("Your code has been rated at 10.00/10"), None);
    }

    #[test]
    fn test_classify_json_falls_back_to_text() {
        let cfg = LintSettings {
            format: ScoreFormat::Json,
            ..LintSettings::default()
        };
        let captured = Captured {
            stdout: "Your code has been rated at 10.00/10\n".into(),
            stderr: String::new(),
            code: Some(0),
        };
        let v = classify("a.py".into(), &captured, &cfg);
        assert!(v.perfect);

        let json = Captured {
            stdout: r#"{"statistics": {"score": 7.0}}"#.into(),
            stderr: "warning: deprecated option\n".into(),
            code: Some(16),
        };
        let v = classify("b.py".into(), &json, &cfg);
        assert!(!v.perfect);
        assert_eq!(
            v.score_line.as_deref(),
            Some("Your code has been rated at 7.00/10")
        );
    }

    #[test]
    fn test_missing_score_is_imperfect() {
        let captured = Captured {
            stdout: String::new(),
            stderr: "Traceback: boom\n".into(),
            code: Some(32),
        };
        let v = classify("c.py".into(), &captured, &LintSettings::default());
        assert!(!v.perfect);
        assert_eq!(v.score_line.as_deref(), Some(NO_SCORE));
    }

    #[cfg(unix)]
    fn fake_linter(root: &Path) -> Vec<String> {
        // Files containing "bad" score 7.50, everything else is perfect.
        let script = root.join("fake-lint.sh");
        fs::write(
            &script,
            "#!/bin/sh\nif grep -q bad \"$1\"; then\n  echo 'Your code has been rated at 7.50/10'\n  exit 16\nfi\necho 'Your code has been rated at 10.00/10'\n",
        )
        .unwrap();
        vec!["sh".into(), script.to_string_lossy().to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn test_run_lint_collects_failures_in_order() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(root, "tests/test_ok.py");
        fs::write(root.join("tests/test_zbad.py"), "bad\n").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/abad.py"), "bad\n").unwrap();
        let cfg = LintSettings {
            command: fake_linter(root),
            dirs: vec!["tests".into(), "src".into()],
            ..LintSettings::default()
        };
        let ticks = AtomicUsize::new(0);
        let report = run_lint(&cfg, root, &|_| {
            ticks.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(report.summary.files, 3);
        let failed: Vec<(&str, Option<&str>)> = report
            .failures
            .iter()
            .map(|v| (v.file.as_str(), v.score_line.as_deref()))
            .collect();
        assert_eq!(
            failed,
            [
                ("tests/test_zbad.py", Some("Your code has been rated at 7.50/10")),
                ("src/abad.py", Some("Your code has been rated at 7.50/10")),
            ]
        );

        // Same inputs, same classification.
        let again = run_lint(&cfg, root, &|_| {}).unwrap();
        assert_eq!(again, report);
    }

    #[test]
    fn test_run_lint_with_no_files() {
        let dir = tempdir().unwrap();
        let cfg = LintSettings {
            command: vec!["testrun-no-such-linter".into()],
            ..LintSettings::default()
        };
        let report = run_lint(&cfg, dir.path(), &|_| {}).unwrap();
        assert!(report.files.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_missing_linter_is_fatal() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "tests/t.py");
        let cfg = LintSettings {
            command: vec!["testrun-no-such-linter".into()],
            ..LintSettings::default()
        };
        let err = run_lint(&cfg, dir.path(), &|_| {}).unwrap_err();
        assert!(matches!(err, Error::Linter { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_linter_hits_output_timeout() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "tests/t.py");
        let cfg = LintSettings {
            command: vec!["sleep".into(), "5".into()],
            output_timeout: Some(Duration::from_millis(200)),
            ..LintSettings::default()
        };
        let err = run_lint(&cfg, dir.path(), &|_| {}).unwrap_err();
        let Error::Linter { source, .. } = err else {
            panic!("expected a linter error");
        };
        assert!(matches!(*source, Error::OutputTimeout { .. }));
    }
}
