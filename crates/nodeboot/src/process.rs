//! Child process lifecycle.
//!
//! Every binary is started detached from the terminal: stdin, stdout and
//! stderr go to the null device. The handle stays owned by the caller so the
//! child can be signalled and reaped on shutdown.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Process launcher errors.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn {}: {reason}", program.display())]
    SpawnFailed { program: PathBuf, reason: String },

    #[error("Port {port} not accepting connections after {timeout:?}")]
    NotReady { port: u16, timeout: Duration },
}

/// An owned, running child.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    child: Child,
}

impl ManagedProcess {
    /// Start `program` with `args`. `name` is only used in logs.
    pub fn spawn(name: &str, program: &Path, args: &[String]) -> Result<Self, ProcessError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed {
                program: program.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!(name, program = %program.display(), pid = ?child.id(), "Started process");
        Ok(Self {
            name: name.to_string(),
            child,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, `None` once the child has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the child is still alive. Reaps it if it has exited.
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(name = %self.name, ?status, "Process has exited");
                false
            }
            Err(e) => {
                warn!(name = %self.name, error = %e, "Cannot query process status");
                false
            }
        }
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL. Never fails; problems are
    /// logged.
    pub async fn terminate(mut self, timeout: Duration) {
        if !self.is_running() {
            return;
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: pid belongs to a child we own and have not reaped yet.
                #[allow(unsafe_code)]
                #[allow(clippy::cast_possible_wrap)]
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    let err = std::io::Error::last_os_error();
                    warn!(name = %self.name, pid, error = %err, "Failed to send SIGTERM");
                }
            }
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(name = %self.name, ?status, "Process exited");
            }
            Ok(Err(e)) => {
                warn!(name = %self.name, error = %e, "Error waiting for process");
                self.child.kill().await.ok();
            }
            Err(_) => {
                warn!(name = %self.name, "Timeout waiting for graceful shutdown, killing");
                self.child.kill().await.ok();
            }
        }
    }
}

/// Poll `127.0.0.1:port` until it accepts a connection.
pub async fn wait_for_port(
    port: u16,
    timeout: Duration,
    interval: Duration,
) -> Result<(), ProcessError> {
    let deadline = Instant::now() + timeout;
    loop {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            debug!(port, "Port is accepting connections");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ProcessError::NotReady { port, timeout });
        }
        sleep(interval).await;
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn spawn_and_terminate() {
        let mut process =
            ManagedProcess::spawn("sleeper", Path::new("/bin/sh"), &sh("exec sleep 30")).unwrap();
        assert_eq!(process.name(), "sleeper");
        assert!(process.pid().is_some());
        assert!(process.is_running());

        let started = Instant::now();
        process.terminate(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(5), "SIGTERM should stop sleep");
    }

    #[tokio::test]
    async fn stubborn_child_is_killed() {
        let mut process = ManagedProcess::spawn(
            "stubborn",
            Path::new("/bin/sh"),
            &sh("trap '' TERM; while true; do sleep 1; done"),
        )
        .unwrap();
        assert!(process.is_running());
        let pid = process.pid().unwrap();

        process.terminate(Duration::from_millis(300)).await;

        // kill(pid, 0) fails once the child is gone and reaped.
        #[allow(unsafe_code, clippy::cast_possible_wrap)]
        let alive = unsafe { libc::kill(pid as i32, 0) } == 0;
        assert!(!alive);
    }

    #[tokio::test]
    async fn exited_child_is_not_running() {
        let mut process = ManagedProcess::spawn("quick", Path::new("/bin/sh"), &sh("exit 0")).unwrap();
        sleep(Duration::from_millis(200)).await;
        assert!(!process.is_running());
        process.terminate(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = ManagedProcess::spawn("ghost", Path::new("/nonexistent/bin"), &[]).unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn port_readiness() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        wait_for_port(port, Duration::from_secs(1), Duration::from_millis(20))
            .await
            .unwrap();

        drop(listener);
        let err = wait_for_port(port, Duration::from_millis(100), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotReady { .. }));
    }
}
