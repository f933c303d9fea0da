//! The background HTTP fixture server.
//!
//! `FixtureServer` owns the child process for its whole lifetime: dropping the
//! handle kills and reaps it, and `install_signal_handler` does the same on
//! SIGINT/SIGTERM/SIGHUP before exiting. Only this one process is ever
//! signalled.

use std::process::{Child, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::command::{kill_hung, CommandSpec};
use crate::error::{Error, Result};

/// Exit status used after a trapped termination signal.
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// Shared slot holding the running server, if any.
#[derive(Clone, Default)]
pub struct ServerSlot(Arc<Mutex<Option<Child>>>);

impl ServerSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Child>> {
        // A panic while holding the lock must not keep the server alive.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Kill and reap the server in the slot. Returns its pid if one was there.
    pub fn terminate(&self) -> Option<u32> {
        let mut child = self.lock().take()?;
        let pid = child.id();
        tracing::info!(pid, "stopping fixture server");
        let _ = child.kill();
        let _ = child.wait();
        Some(pid)
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().as_ref().map(Child::id)
    }

    fn exit_code(&self) -> Result<Option<Option<i32>>> {
        match self.lock().as_mut() {
            Some(child) => Ok(child.try_wait()?.map(|s| s.code())),
            None => Ok(None),
        }
    }
}

/// Register the termination handler for the given slot. Call once per process.
pub fn install_signal_handler(slot: ServerSlot) -> std::result::Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if let Some(pid) = slot.terminate() {
            tracing::warn!(pid, "interrupted; fixture server stopped");
        }
        std::process::exit(SIGNAL_EXIT_CODE);
    })
}

/// Handle owning a running fixture server.
pub struct FixtureServer {
    slot: ServerSlot,
    url: String,
}

impl FixtureServer {
    /// Start the server detached from our stdio, placing it in `slot`.
    pub fn spawn(spec: &CommandSpec, url: impl Into<String>, slot: ServerSlot) -> Result<Self> {
        let mut cmd = spec.prepare()?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // Held across the spawn so the signal handler either finds the child
        // in the slot or runs before it exists.
        let mut held = slot.lock();
        let child = cmd.spawn().map_err(|source| Error::Spawn {
            command: spec.display(),
            source,
        })?;
        tracing::info!(pid = child.id(), "fixture server started");
        if let Some(mut previous) = held.replace(child) {
            kill_hung(&mut previous);
        }
        drop(held);
        Ok(FixtureServer {
            slot,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pid(&self) -> Option<u32> {
        self.slot.pid()
    }

    /// Poll the server URL until it answers 200, the deadline passes, or the
    /// server process exits.
    pub fn wait_ready(&self, timeout: Duration, interval: Duration) -> Result<()> {
        let started = Instant::now();
        let agent = ureq::AgentBuilder::new()
            .timeout(interval.max(Duration::from_millis(250)))
            .build();
        loop {
            if let Some(code) = self.slot.exit_code()? {
                return Err(Error::ServerExited { code });
            }
            match agent.get(&self.url).call() {
                Ok(resp) if resp.status() == 200 => {
                    tracing::info!(
                        url = %self.url,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "fixture server ready"
                    );
                    return Ok(());
                }
                Ok(resp) => tracing::debug!(status = resp.status(), "fixture server not ready"),
                Err(ureq::Error::Status(status, _)) => {
                    tracing::debug!(status, "fixture server not ready")
                }
                Err(e) => tracing::trace!(error = %e, "fixture server not reachable"),
            }
            if started.elapsed() >= timeout {
                return Err(Error::NotReady {
                    url: self.url.clone(),
                    waited: started.elapsed(),
                });
            }
            thread::sleep(interval);
        }
    }

    /// Stop the server now.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.slot.terminate();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    fn sleeper() -> CommandSpec {
        CommandSpec::from_argv(&["sleep".into(), "30".into()], "server").unwrap()
    }

    fn alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_drop_terminates_server() {
        let slot = ServerSlot::default();
        let server = FixtureServer::spawn(&sleeper(), "http://127.0.0.1:1", slot.clone()).unwrap();
        let pid = server.pid().unwrap();
        assert!(alive(pid));
        drop(server);
        assert!(slot.pid().is_none());
        assert!(!alive(pid));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_slot_terminate_is_what_the_signal_handler_runs() {
        let slot = ServerSlot::default();
        let server = FixtureServer::spawn(&sleeper(), "http://127.0.0.1:1", slot.clone()).unwrap();
        let pid = slot.terminate().unwrap();
        assert!(!alive(pid));
        assert!(server.pid().is_none());
        // Dropping afterwards is a no-op.
        drop(server);
        assert!(slot.terminate().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_terminate_racing_spawn_never_orphans() {
        for _ in 0..20 {
            let slot = ServerSlot::default();
            let killer = {
                let slot = slot.clone();
                thread::spawn(move || loop {
                    if let Some(pid) = slot.terminate() {
                        return pid;
                    }
                    thread::yield_now();
                })
            };
            let server = FixtureServer::spawn(&sleeper(), "http://127.0.0.1:1", slot.clone()).unwrap();
            let pid = killer.join().unwrap();
            assert!(!alive(pid));
            assert!(server.pid().is_none());
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_spawn_replaces_previous_server() {
        let slot = ServerSlot::default();
        let first = FixtureServer::spawn(&sleeper(), "http://127.0.0.1:1", slot.clone()).unwrap();
        let first_pid = first.pid().unwrap();
        let second = FixtureServer::spawn(&sleeper(), "http://127.0.0.1:1", slot.clone()).unwrap();
        assert!(!alive(first_pid));
        assert_ne!(second.pid(), Some(first_pid));
        std::mem::forget(first);
        drop(second);
        assert!(slot.pid().is_none());
    }

    #[test]
    fn test_wait_ready_polls_until_200() {
        let http = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", http.server_addr());
        thread::spawn(move || {
            for (i, req) in http.incoming_requests().enumerate() {
                let code = if i < 2 { 503 } else { 200 };
                let _ = req.respond(tiny_http::Response::from_string("ok").with_status_code(code));
            }
        });
        let server = FixtureServer::spawn(&sleeper(), url, ServerSlot::default()).unwrap();
        server
            .wait_ready(Duration::from_secs(5), Duration::from_millis(10))
            .unwrap();
    }

    #[test]
    fn test_wait_ready_times_out() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/");
        let server = FixtureServer::spawn(&sleeper(), url, ServerSlot::default()).unwrap();
        let err = server
            .wait_ready(Duration::from_millis(200), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
    }

    #[test]
    fn test_wait_ready_notices_exited_server() {
        let spec = CommandSpec::from_argv(
            &["sh".into(), "-c".into(), "exit 4".into()],
            "server",
        )
        .unwrap();
        let server = FixtureServer::spawn(&spec, "http://127.0.0.1:1/", ServerSlot::default()).unwrap();
        let err = server
            .wait_ready(Duration::from_secs(5), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::ServerExited { code: Some(4) }));
    }
}
