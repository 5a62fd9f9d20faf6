//! Unix child-process handle with exit-status caching and signal forwarding
//!
//! The child runs in the supervisor's session and inherits its (already
//! redirected) stdout/stderr, so everything the server prints lands in the
//! configured output file. Signals are forwarded to the child's PID only;
//! the launched server owns whatever process tree it creates.

use crate::config::LaunchSpec;
use crate::{CoreError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::ExitStatus;
use tokio::process::{Child, Command};
use tracing::{debug, error};

/// A spawned server process owned by the supervisor
#[derive(Debug)]
pub struct ChildProcess {
    /// The process ID of the spawned process
    pid: Pid,
    /// The underlying handle for waiting and status checking
    child: Child,
    /// Exit status recorded by the first successful wait
    status: Option<ExitStatus>,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Whether the child has been observed to exit
    pub fn exited(&self) -> bool {
        self.status.is_some()
    }

    /// Wait for the process to exit and return its exit status (async).
    ///
    /// The status is recorded on first completion; calling again after the
    /// child has exited returns the recorded status immediately without
    /// re-blocking.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await.map_err(|e| {
            CoreError::ChildSpawn(format!("failed to wait for process {}: {e}", self.pid))
        })?;
        self.status = Some(status);
        Ok(status)
    }

    /// Try to reap the process without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        let status = self.child.try_wait().map_err(|e| {
            CoreError::ChildSpawn(format!("failed to try_wait for process {}: {e}", self.pid))
        })?;
        if let Some(s) = status {
            self.status = Some(s);
        }
        Ok(status)
    }

    /// Forward a signal to the child.
    ///
    /// `ESRCH`/`EPERM` mean the child is already gone (or was reparented
    /// away); that is the non-fatal [`CoreError::SignalForward`] case, which
    /// the supervisor logs and survives.
    pub fn forward_signal(&self, signal: Signal) -> Result<()> {
        if self.status.is_some() {
            return Err(CoreError::SignalForward { pid: self.pid() });
        }
        debug!("Forwarding {} to child {}", signal, self.pid);
        match kill(self.pid, signal) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) | Err(nix::errno::Errno::EPERM) => {
                Err(CoreError::SignalForward { pid: self.pid() })
            }
            Err(e) => Err(CoreError::ChildSpawn(format!(
                "failed to signal process {}: {e}",
                self.pid
            ))),
        }
    }
}

/// Spawn the target executable from a [`LaunchSpec`] as a child of the
/// current (typically already daemonized) process. Does not block; the
/// caller keeps the handle for signal relay and exit-code retrieval.
pub fn spawn(spec: &LaunchSpec) -> Result<ChildProcess> {
    debug!("Spawning {} {:?}", spec.executable.display(), spec.args);

    let child = Command::new(&spec.executable)
        .args(&spec.args)
        .spawn()
        .map_err(|e| {
            error!("Failed to spawn '{}': {}", spec.executable.display(), e);
            CoreError::ChildSpawn(format!("failed to spawn '{}': {e}", spec.executable.display()))
        })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::ChildSpawn("spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Spawned child process {}", pid);

    Ok(ChildProcess {
        pid,
        child,
        status: None,
    })
}
