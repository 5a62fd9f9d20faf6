//! PID-file guard against duplicate server instances
//!
//! The guard discipline is check-then-create: probe whether the process named
//! in an existing file is still alive, then create the file exclusively. The
//! window between the probe and the create is a known, accepted race
//! (single-shot launcher, not a lock manager); it is kept as small as
//! possible by creating the file immediately after the probe, and a lost
//! create race is still reported as a contended instance.

#![cfg(unix)]

use crate::{CoreError, Result};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An acquired PID file. Removing the file on drop means any error path that
/// unwinds out of the supervisor releases the guard.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl PidFile {
    /// Acquire the PID file at `path`, recording `pid` as the owner.
    ///
    /// Fails with [`CoreError::AlreadyRunning`] when an existing file names a
    /// live process. A stale file (dead process, or unparsable content) is
    /// removed and acquisition proceeds.
    pub fn acquire(path: &Path, pid: u32) -> Result<PidFile> {
        preflight(path)?;
        match try_create(path, pid) {
            Ok(()) => {}
            Err(CoreError::AlreadyRunning { .. }) => {
                // Lost the create race or preflight removed a file that was
                // immediately recreated. Re-probe once, then give up.
                preflight(path)?;
                try_create(path, pid)?;
            }
            Err(e) => return Err(e),
        }
        debug!("Acquired PID file {} for PID {}", path.display(), pid);
        Ok(PidFile {
            path: path.to_path_buf(),
            pid,
            released: false,
        })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the file
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Remove the PID file, consuming the guard.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        fs::remove_file(&self.path)
            .map_err(|e| CoreError::PidFile(format!("failed to remove {}: {e}", self.path.display())))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove PID file {}: {}", self.path.display(), e);
                }
            }
            self.released = true;
        }
    }
}

/// Check an existing PID file and clear it if stale.
///
/// Returns `Ok(())` when the path is free (absent, or stale file removed) and
/// [`CoreError::AlreadyRunning`] when the file names a live process. The live
/// instance's file is left untouched.
pub fn preflight(path: &Path) -> Result<()> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(CoreError::PidFile(format!(
                "failed to read {}: {e}",
                path.display()
            )))
        }
    };

    match contents.trim().parse::<u32>() {
        Ok(pid) if pid_alive(pid) => Err(CoreError::AlreadyRunning {
            path: path.to_path_buf(),
            pid,
        }),
        Ok(pid) => {
            warn!(
                "Removing stale PID file {} (PID {} not running)",
                path.display(),
                pid
            );
            remove_stale(path)
        }
        Err(_) => {
            warn!("Removing unparsable PID file {}", path.display());
            remove_stale(path)
        }
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::PidFile(format!(
            "failed to remove stale {}: {e}",
            path.display()
        ))),
    }
}

/// Exclusive create. An `AlreadyExists` failure means another instance won
/// the create race and is reported as contention.
fn try_create(path: &Path, pid: u32) -> Result<()> {
    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let holder = fs::read_to_string(path)
                .ok()
                .and_then(|c| c.trim().parse::<u32>().ok())
                .unwrap_or(0);
            return Err(CoreError::AlreadyRunning {
                path: path.to_path_buf(),
                pid: holder,
            });
        }
        Err(e) => {
            return Err(CoreError::PidFile(format!(
                "failed to create {}: {e}",
                path.display()
            )))
        }
    };

    writeln!(file, "{pid}")
        .and_then(|()| file.sync_all())
        .map_err(|e| CoreError::PidFile(format!("failed to write {}: {e}", path.display())))
}

/// Whether a process with the given PID is currently running.
///
/// Probes with `kill(pid, 0)`: `EPERM` means the process exists but belongs
/// to someone else, so it counts as alive; `ESRCH` means it is gone. PIDs
/// `<= 0` are never considered alive (0 and negatives address process
/// groups, not single processes).
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
