//! Daemon supervisor: detach, guard, spawn, relay, propagate
//!
//! Turns a foreground launch request into a detached background process with
//! a guarded PID file, redirected output, and a SIGTERM relay that forwards
//! termination to the launched child.
//!
//! ## Lifecycle
//!
//! ```text
//! Unstarted → Daemonizing → Running → SignalReceived → Exiting
//!                              └──────→ Exited(code)
//! ```
//!
//! Stopping the supervisor (e.g. via process-manager tooling) also stops the
//! server it launched rather than orphaning it. On the signal path the
//! supervisor exits 0 once the forward is dispatched; it does not wait for
//! the child to confirm shutdown, so an unresponsive child cannot hang the
//! teardown. On the natural-exit path the supervisor's exit code equals the
//! child's, so tooling watching the supervisor learns the server's outcome.

#![cfg(unix)]

use crate::config::LaunchSpec;
use crate::pidfile::{self, PidFile};
use crate::process::{self, ChildProcess};
use crate::{CoreError, Result};
use nix::sys::signal::Signal;
use nix::unistd::{dup2, fork, setsid, ForkResult};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Supervisor lifecycle state, tracked for logging and introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No daemonization attempted yet
    Unstarted,
    /// Detached and holding the PID file, child not yet spawned
    Daemonizing,
    /// Child spawned, relay armed
    Running,
    /// Termination signal delivered
    SignalReceived,
    /// Signal forwarded to the child, supervisor about to exit
    Exiting,
    /// Terminal: supervisor done with the recorded exit code
    Exited(i32),
}

impl SupervisorState {
    /// Whether this state ends the supervisor's life
    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::Exited(_))
    }
}

/// In-memory handle to a daemonized (or attached) supervisor.
///
/// Owns the PID-file guard: dropping the handle on any exit path, including
/// a failed child spawn, removes the PID file.
#[derive(Debug)]
pub struct Handle {
    pid_file: PidFile,
    state: SupervisorState,
}

impl Handle {
    /// Attach a supervisor to an already-acquired PID file without detaching
    /// from the session. This is the embedding entry point (and what tests
    /// use); [`daemonize`] goes through it after forking.
    pub fn attached(pid_file: PidFile) -> Handle {
        Handle {
            pid_file,
            state: SupervisorState::Daemonizing,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// PID recorded in the guarded PID file
    pub fn pid(&self) -> u32 {
        self.pid_file.pid()
    }

    /// Spawn the target executable under this supervisor. Does not block;
    /// the caller keeps the returned handle for signal relay and exit-code
    /// retrieval.
    pub fn spawn(&mut self, spec: &LaunchSpec) -> Result<ChildProcess> {
        let child = process::spawn(spec)?;
        self.advance(SupervisorState::Running);
        Ok(child)
    }

    fn advance(&mut self, next: SupervisorState) {
        debug!("Supervisor state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Detach the current process and acquire the PID file.
///
/// Must be called before any async runtime is started: it forks twice (with
/// `setsid` in between), and the intermediate parents exit 0, so the function
/// only returns in the final daemon process. Standard input is pointed at
/// `/dev/null`; stdout and stderr are redirected to the spec's output file
/// opened in append mode.
///
/// Contention is checked in the launching process first, so
/// [`CoreError::AlreadyRunning`] reaches the invoker before any fork; the
/// daemon re-acquires the file with its own PID afterwards. Output-directory
/// failures are likewise reported before detaching.
pub fn daemonize(spec: &LaunchSpec) -> Result<Handle> {
    pidfile::preflight(&spec.pid_file)?;

    let out = open_output(&spec.output_file)?;
    let devnull = File::open("/dev/null")?;

    detach()?;

    // From here on the invoker is gone; anything we report lands in the
    // output file.
    redirect_stdio(&devnull, &out)?;
    let pid_file = PidFile::acquire(&spec.pid_file, std::process::id())?;
    Ok(Handle::attached(pid_file))
}

/// Double fork with a `setsid` in between, so the daemon is a session leader
/// orphan that cannot reacquire a controlling terminal.
fn detach() -> Result<()> {
    // SAFETY: called before any runtime threads exist; the child performs
    // only async-signal-safe work before returning to Rust.
    match unsafe { fork() }.map_err(fork_err)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(|e| CoreError::UnsupportedPlatform(format!("setsid failed: {e}")))?;

    match unsafe { fork() }.map_err(fork_err)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }
    Ok(())
}

fn fork_err(e: nix::errno::Errno) -> CoreError {
    CoreError::UnsupportedPlatform(format!("fork failed: {e}"))
}

fn open_output(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| {
            CoreError::OutputPath(format!("cannot create {}: {e}", dir.display()))
        })?;
    }
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| CoreError::OutputPath(format!("cannot open {}: {e}", path.display())))
}

fn redirect_stdio(stdin: &File, out: &File) -> Result<()> {
    dup2(stdin.as_raw_fd(), 0)
        .and_then(|_| dup2(out.as_raw_fd(), 1))
        .and_then(|_| dup2(out.as_raw_fd(), 2))
        .map_err(|e| CoreError::OutputPath(format!("failed to redirect stdio: {e}")))?;
    Ok(())
}

/// Trigger half of the terminate-notification channel
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl ShutdownTrigger {
    /// Request supervisor termination. Idempotent; later triggers are no-ops.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

/// Listener half of the terminate-notification channel
#[derive(Debug)]
pub struct Shutdown {
    rx: mpsc::UnboundedReceiver<()>,
}

impl Shutdown {
    /// Resolve when termination is requested. If every trigger is dropped
    /// without firing, this never resolves.
    pub async fn recv(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create the typed terminate-notification channel used by the signal relay.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Run the supervisor to completion with SIGTERM wired into the relay.
///
/// Returns the process exit code for the launcher: the child's exit code on
/// natural exit, or 0 on the signal path.
pub async fn run(handle: Handle, spec: &LaunchSpec) -> Result<i32> {
    let (trigger, shutdown) = shutdown_channel();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        if sigterm.recv().await.is_some() {
            trigger.trigger();
        }
    });
    run_with_shutdown(handle, spec, shutdown).await
}

enum Outcome {
    Exited(ExitStatus),
    Terminate,
}

/// Run loop with an explicit terminate listener, so termination can come
/// from a signal or from an embedding caller.
///
/// On the signal path the return value is 0 regardless of how the child
/// eventually exits; the forward is fire-and-forget by design. A signal that
/// arrives after the child already exited is logged and the supervisor still
/// exits 0. Any error return, including a failed spawn, drops the handle and
/// with it the PID file.
pub async fn run_with_shutdown(
    mut handle: Handle,
    spec: &LaunchSpec,
    mut shutdown: Shutdown,
) -> Result<i32> {
    info!(
        "launching {} {}",
        spec.executable.display(),
        spec.args.join(" ")
    );
    let mut child = handle.spawn(spec)?;

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status?),
        () = shutdown.recv() => Outcome::Terminate,
    };

    match outcome {
        Outcome::Exited(status) => {
            let code = exit_code(status);
            info!("child {} exited with {}", child.pid(), status);
            handle.advance(SupervisorState::Exited(code));
            Ok(code)
        }
        Outcome::Terminate => {
            handle.advance(SupervisorState::SignalReceived);
            relay_term(&child);
            handle.advance(SupervisorState::Exiting);
            Ok(0)
        }
    }
}

fn relay_term(child: &ChildProcess) {
    match child.forward_signal(Signal::SIGTERM) {
        Ok(()) => info!("forwarded SIGTERM to child {}", child.pid()),
        Err(e @ CoreError::SignalForward { .. }) => warn!("{}", e),
        Err(e) => warn!("signal relay failed: {}", e),
    }
}

/// Map a child exit status to the launcher's exit code, using the Unix
/// convention of 128 + signal number for signal deaths.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
