//! Shared data models for pipeline steps and lint results.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
/// A pipeline step, in execution order.
pub enum Step {
    EraseCoverage,
    Tests,
    CoverageReport,
    Lint,
}

impl Step {
    pub const ALL: [Step; 4] = [
        Step::EraseCoverage,
        Step::Tests,
        Step::CoverageReport,
        Step::Lint,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::EraseCoverage => "erase-coverage",
            Step::Tests => "tests",
            Step::CoverageReport => "coverage-report",
            Step::Lint => "lint",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Step::ALL
            .into_iter()
            .find(|step| step.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::UnknownStep(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
/// Lint classification of a single file.
pub struct FileVerdict {
    pub file: String,
    pub score: Option<f64>,
    /// The score line captured from the linter, if any.
    pub score_line: Option<String>,
    pub perfect: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
/// Aggregated lint summary used by printers.
pub struct LintSummary {
    pub files: usize,
    pub perfect: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
/// Lint pass results; `failures` keeps discovery order.
pub struct LintReport {
    pub files: Vec<FileVerdict>,
    pub failures: Vec<FileVerdict>,
    pub summary: LintSummary,
}

impl LintReport {
    pub fn from_verdicts(files: Vec<FileVerdict>) -> Self {
        let failures: Vec<FileVerdict> = files.iter().filter(|v| !v.perfect).cloned().collect();
        let summary = LintSummary {
            files: files.len(),
            perfect: files.len() - failures.len(),
            failures: failures.len(),
        };
        LintReport {
            files,
            failures,
            summary,
        }
    }
}
