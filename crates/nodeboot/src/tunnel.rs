//! Tunnel client supervisor.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use nodeboot_core::discovery::TunnelControl;
use nodeboot_core::{Error, Result};

use crate::process::{ManagedProcess, ProcessError};

/// Owns the tunnel client process and knows how to (re)start it.
#[derive(Debug)]
pub struct TunnelSupervisor {
    program: PathBuf,
    args: Vec<String>,
    terminate_timeout: Duration,
    process: Option<ManagedProcess>,
}

impl TunnelSupervisor {
    pub const fn new(program: PathBuf, args: Vec<String>, terminate_timeout: Duration) -> Self {
        Self {
            program,
            args,
            terminate_timeout,
            process: None,
        }
    }

    /// Start the client unless one is already running.
    pub fn launch(&mut self) -> std::result::Result<(), ProcessError> {
        if let Some(process) = self.process.as_mut() {
            if process.is_running() {
                debug!("Tunnel client already running");
                return Ok(());
            }
        }
        self.process = Some(ManagedProcess::spawn("tunnel", &self.program, &self.args)?);
        Ok(())
    }

    pub fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(ManagedProcess::is_running)
    }

    /// Terminate the client if it is running.
    pub async fn shutdown(&mut self) {
        if let Some(process) = self.process.take() {
            process.terminate(self.terminate_timeout).await;
        }
    }
}

impl TunnelControl for TunnelSupervisor {
    async fn stop(&mut self) {
        self.shutdown().await;
    }

    async fn start(&mut self) -> Result<()> {
        self.launch().map_err(|e| Error::Process(e.to_string()))
    }
}
