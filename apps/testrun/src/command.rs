//! Running external tools.
//!
//! Commands are argv vectors, never shell strings. Both runners poll the
//! child instead of blocking in `wait`, so total and idle timeouts can be
//! enforced; a child that outlives its runner is killed and reaped.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Default)]
/// A command to run, with its optional working directory, extra environment
/// and time limits.
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Total run time allowed.
    pub timeout: Option<Duration>,
    /// Longest stretch allowed without output (captured runs only).
    pub output_timeout: Option<Duration>,
}

impl CommandSpec {
    /// Build from an argv vector; `what` names the setting in errors.
    pub fn from_argv(argv: &[String], what: &'static str) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or(Error::EmptyCommand(what))?;
        Ok(CommandSpec {
            program: program.clone(),
            args: args.to_vec(),
            ..CommandSpec::default()
        })
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_timeout(mut self, idle: Option<Duration>) -> Self {
        self.output_timeout = idle;
        self
    }

    /// Copy/paste form of the command line.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Check the working directory, log the start, and build the `Command`.
    pub(crate) fn prepare(&self) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        match &self.cwd {
            Some(cwd) => {
                if !cwd.is_dir() {
                    return Err(Error::MissingCwd {
                        command: self.display(),
                        cwd: cwd.clone(),
                    });
                }
                tracing::info!(command = %self.display(), cwd = %cwd.display(), "running command");
                cmd.current_dir(cwd);
            }
            None => tracing::info!(command = %self.display(), "running command"),
        }
        if !self.env.is_empty() {
            tracing::debug!(env = ?self.env, "using env");
            cmd.envs(&self.env);
        }
        Ok(cmd)
    }

    fn spawn_err(&self, source: std::io::Error) -> Error {
        Error::Spawn {
            command: self.display(),
            source,
        }
    }
}

fn quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Kill and reap a child that is still running.
pub(crate) fn kill_hung(child: &mut Child) {
    if let Ok(None) = child.try_wait() {
        tracing::warn!(pid = child.id(), "killing process that's still here");
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Run with inherited stdio. A non-zero exit is `Error::CommandFailed`.
pub fn run_status(spec: &CommandSpec) -> Result<()> {
    let mut child = spec.prepare()?.spawn().map_err(|e| spec.spawn_err(e))?;
    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                kill_hung(&mut child);
                return Err(e.into());
            }
        }
        if let Some(limit) = spec.timeout {
            if started.elapsed() >= limit {
                kill_hung(&mut child);
                return Err(Error::Timeout {
                    command: spec.display(),
                    elapsed: started.elapsed(),
                });
            }
        }
        thread::sleep(POLL_INTERVAL);
    };
    check_status(spec, status)
}

fn check_status(spec: &CommandSpec, status: ExitStatus) -> Result<()> {
    if status.success() {
        tracing::debug!(command = %spec.display(), "command succeeded");
        Ok(())
    } else {
        Err(Error::CommandFailed {
            command: spec.display(),
            code: status.code(),
        })
    }
}

#[derive(Debug, Clone)]
/// Result of a captured run.
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl Captured {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

fn pump<R: Read + Send + 'static>(
    mut reader: R,
    tx: mpsc::Sender<Chunk>,
    wrap: fn(Vec<u8>) -> Chunk,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Run with stdout and stderr captured. The exit code is returned, not
/// judged: linters exit non-zero whenever they report anything.
pub fn run_captured(spec: &CommandSpec) -> Result<Captured> {
    let mut cmd = spec.prepare()?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| spec.spawn_err(e))?;

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::new();
    if let Some(out) = child.stdout.take() {
        readers.push(pump(out, tx.clone(), Chunk::Stdout));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(pump(err, tx.clone(), Chunk::Stderr));
    }
    drop(tx);

    let started = Instant::now();
    let mut last_output = started;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut open = true;
    let status = loop {
        if open {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Chunk::Stdout(b)) => {
                    stdout.extend(b);
                    last_output = Instant::now();
                }
                Ok(Chunk::Stderr(b)) => {
                    stderr.extend(b);
                    last_output = Instant::now();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => open = false,
            }
        } else {
            thread::sleep(POLL_INTERVAL);
        }
        match child.try_wait() {
            Ok(Some(status)) if !open => break status,
            Ok(_) => {}
            Err(e) => {
                kill_hung(&mut child);
                return Err(e.into());
            }
        }
        let now = Instant::now();
        if let Some(idle) = spec.output_timeout {
            if now.duration_since(last_output) >= idle {
                kill_hung(&mut child);
                return Err(Error::OutputTimeout {
                    command: spec.display(),
                    idle,
                });
            }
        }
        if let Some(limit) = spec.timeout {
            if now.duration_since(started) >= limit {
                kill_hung(&mut child);
                return Err(Error::Timeout {
                    command: spec.display(),
                    elapsed: now.duration_since(started),
                });
            }
        }
    };
    for r in readers {
        let _ = r.join();
    }

    Ok(Captured {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        code: status.code(),
    })
}
