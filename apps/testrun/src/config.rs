//! Configuration discovery and effective settings resolution.
//!
//! testrun reads `testrun.toml|yaml|yml` from the repository root (or closest
//! ancestor) and merges it with CLI flags to produce an `Effective` config.
//! Defaults:
//! - `output`: `human`, `strict`: false
//! - `coverage.erase`: `coverage erase`, `coverage.report`: `coverage html`
//! - `server.command`: `python tests/http/cgi_server.py` on `localhost:8001`,
//!   exported to the tests as `SCRIPTHARNESS_TEST_URL`
//! - `tests.command`: `tox`
//! - `lint.command`: `pylint` over `tests/` and `scriptharness/` `*.py` files,
//!   perfect when rated `10.00/10`
//!
//! Overrides precedence: CLI > config file > defaults.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::Step;

const CONFIG_NAMES: [&str; 3] = ["testrun.toml", "testrun.yaml", "testrun.yml"];

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
/// Root configuration loaded from `testrun.toml|yaml`.
pub struct TestrunConfig {
    pub output: Option<String>,
    pub strict: Option<bool>,
    #[serde(default)]
    pub coverage: Option<CoverageCfg>,
    #[serde(default)]
    pub server: Option<ServerCfg>,
    #[serde(default)]
    pub tests: Option<TestsCfg>,
    #[serde(default)]
    pub lint: Option<LintCfg>,
    #[serde(default)]
    pub steps: Option<StepsCfg>,
}

#[derive(Debug, Default, Deserialize, Clone)]
/// `[coverage]`: argv for erasing data and rendering the HTML report.
pub struct CoverageCfg {
    pub erase: Option<Vec<String>>,
    pub report: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Clone)]
/// `[server]`: the HTTP fixture server started for the test run.
pub struct ServerCfg {
    pub command: Option<Vec<String>>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub url_env: Option<String>,
    pub ready: Option<bool>,
    pub ready_timeout_ms: Option<u64>,
    pub ready_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct TestsCfg {
    pub command: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct LintCfg {
    pub command: Option<Vec<String>>,
    pub dirs: Option<Vec<String>>,
    pub extension: Option<String>,
    pub phrase: Option<String>,
    pub perfect: Option<String>,
    pub max_score: Option<f64>,
    pub format: Option<ScoreFormat>,
    pub json_args: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub output_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct StepsCfg {
    #[serde(default)]
    pub only: Vec<String>,
    #[serde(default)]
    pub skip: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// How the linter reports its score.
pub enum ScoreFormat {
    /// Scan output for the rating phrase.
    #[default]
    Text,
    /// pylint `json2` report, with the phrase scan as fallback.
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub command: Vec<String>,
    pub host: String,
    pub port: u16,
    pub url_env: String,
    pub ready: bool,
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
}

impl ServerSettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct TestSettings {
    pub command: Vec<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct LintSettings {
    pub command: Vec<String>,
    pub dirs: Vec<String>,
    pub extension: String,
    pub phrase: String,
    pub perfect: String,
    pub max_score: f64,
    pub format: ScoreFormat,
    pub json_args: Vec<String>,
    pub timeout: Option<Duration>,
    /// Longest silence allowed from the linter.
    pub output_timeout: Option<Duration>,
}

impl Default for LintSettings {
    fn default() -> Self {
        LintSettings {
            command: vec!["pylint".to_string()],
            dirs: vec!["tests".to_string(), "scriptharness".to_string()],
            extension: "py".to_string(),
            phrase: "Your code has been rated at".to_string(),
            perfect: "10.00/10".to_string(),
            max_score: 10.0,
            format: ScoreFormat::Text,
            json_args: vec!["--output-format=json2".to_string()],
            timeout: None,
            output_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
/// Fully-resolved configuration used by commands after applying precedence.
pub struct Effective {
    pub repo_root: PathBuf,
    /// Config file that was loaded, if any.
    pub config_path: Option<PathBuf>,
    pub output: String,
    pub strict: bool,
    pub coverage_erase: Vec<String>,
    pub coverage_report: Vec<String>,
    pub server: ServerSettings,
    pub tests: TestSettings,
    pub lint: LintSettings,
    pub steps: BTreeSet<Step>,
}

#[derive(Debug, Default, Clone)]
/// Values supplied on the command line; `None`/empty means "not given".
pub struct Overrides {
    pub repo_root: Option<String>,
    pub config: Option<String>,
    pub output: Option<String>,
    pub strict: Option<bool>,
    pub only: Vec<String>,
    pub skip: Vec<String>,
}

/// Walk upward from `start` to detect the repository root.
///
/// Stops when a `testrun.toml|yaml|yml` or a `.git` directory is found.
/// A relative `start` is resolved against the current directory first.
pub fn detect_repo_root(start: &Path) -> PathBuf {
    let start = fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
    let mut cur = start.as_path();
    loop {
        if CONFIG_NAMES.iter().any(|name| cur.join(name).exists()) || cur.join(".git").exists() {
            return cur.to_path_buf();
        }
        match cur.parent() {
            Some(p) => cur = p,
            None => return start,
        }
    }
}

/// Locate the config file under `root`, TOML first.
pub fn find_config(root: &Path) -> Option<PathBuf> {
    CONFIG_NAMES
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
}

/// Parse a config file, choosing the format from its extension.
pub fn load_config_file(path: &Path) -> Result<TestrunConfig> {
    let s = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let parsed: Result<TestrunConfig, String> = if is_yaml {
        serde_yaml::from_str(&s).map_err(|e| e.to_string())
    } else {
        toml::from_str(&s).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| Error::ConfigParse {
        path: path.to_path_buf(),
        message,
    })
}

/// Load `TestrunConfig` from `testrun.toml` or `testrun.yaml|yml` if present.
pub fn load_config(root: &Path) -> Result<Option<(PathBuf, TestrunConfig)>> {
    match find_config(root) {
        Some(path) => {
            let cfg = load_config_file(&path)?;
            Ok(Some((path, cfg)))
        }
        None => Ok(None),
    }
}

fn secs(v: Option<u64>) -> Option<Duration> {
    v.filter(|s| *s > 0).map(Duration::from_secs)
}

/// Resolve `Effective` by merging CLI flags, discovered config, and defaults.
pub fn resolve_effective(cli: &Overrides) -> Result<Effective> {
    let start = PathBuf::from(cli.repo_root.as_deref().unwrap_or("."));
    let repo_root = detect_repo_root(&start);

    let (config_path, cfg) = match cli.config.as_deref() {
        Some(explicit) => {
            let p = PathBuf::from(explicit);
            let p = if p.is_absolute() { p } else { repo_root.join(p) };
            let cfg = load_config_file(&p)?;
            (Some(p), cfg)
        }
        None => match load_config(&repo_root)? {
            Some((p, cfg)) => (Some(p), cfg),
            None => (None, TestrunConfig::default()),
        },
    };

    let output = cli
        .output
        .clone()
        .or(cfg.output)
        .unwrap_or_else(|| "human".to_string());
    let strict = cli.strict.or(cfg.strict).unwrap_or(false);

    let coverage = cfg.coverage.unwrap_or_default();
    let coverage_erase = coverage
        .erase
        .unwrap_or_else(|| vec!["coverage".to_string(), "erase".to_string()]);
    let coverage_report = coverage
        .report
        .unwrap_or_else(|| vec!["coverage".to_string(), "html".to_string()]);

    let srv = cfg.server.unwrap_or_default();
    let server = ServerSettings {
        command: srv.command.unwrap_or_else(|| {
            vec!["python".to_string(), "tests/http/cgi_server.py".to_string()]
        }),
        host: srv.host.unwrap_or_else(|| "localhost".to_string()),
        port: srv.port.unwrap_or(8001),
        url_env: srv
            .url_env
            .unwrap_or_else(|| "SCRIPTHARNESS_TEST_URL".to_string()),
        ready: srv.ready.unwrap_or(true),
        ready_timeout: Duration::from_millis(srv.ready_timeout_ms.unwrap_or(5000)),
        ready_interval: Duration::from_millis(srv.ready_interval_ms.unwrap_or(20).max(1)),
    };

    let tst = cfg.tests.unwrap_or_default();
    let tests = TestSettings {
        command: tst.command.unwrap_or_else(|| vec!["tox".to_string()]),
        timeout: secs(tst.timeout_secs),
    };

    let lc = cfg.lint.unwrap_or_default();
    let defaults = LintSettings::default();
    let lint = LintSettings {
        command: lc.command.unwrap_or(defaults.command),
        dirs: lc.dirs.unwrap_or(defaults.dirs),
        extension: lc
            .extension
            .map(|e| e.trim_start_matches('.').to_string())
            .unwrap_or(defaults.extension),
        phrase: lc.phrase.unwrap_or(defaults.phrase),
        perfect: lc.perfect.unwrap_or(defaults.perfect),
        max_score: lc.max_score.unwrap_or(defaults.max_score),
        format: lc.format.unwrap_or(defaults.format),
        json_args: lc.json_args.unwrap_or(defaults.json_args),
        timeout: secs(lc.timeout_secs),
        output_timeout: secs(lc.output_timeout_secs),
    };

    let steps_cfg = cfg.steps.unwrap_or_default();
    let only = if cli.only.is_empty() {
        steps_cfg.only
    } else {
        cli.only.clone()
    };
    let steps = select_steps(&only, cli.skip.iter().chain(steps_cfg.skip.iter()))?;

    Ok(Effective {
        repo_root,
        config_path,
        output,
        strict,
        coverage_erase,
        coverage_report,
        server,
        tests,
        lint,
        steps,
    })
}

/// Enabled steps: `only` (or all when empty) minus `skip`.
pub fn select_steps<'a>(
    only: &[String],
    skip: impl IntoIterator<Item = &'a String>,
) -> Result<BTreeSet<Step>> {
    let mut steps: BTreeSet<Step> = if only.is_empty() {
        Step::ALL.into_iter().collect()
    } else {
        only.iter()
            .map(|s| s.parse::<Step>())
            .collect::<Result<_>>()?
    };
    for s in skip {
        steps.remove(&s.parse::<Step>()?);
    }
    Ok(steps)
}
