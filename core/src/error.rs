//! Core error types and utilities

use std::path::PathBuf;
use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("daemon mode not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    #[error("server already running, PID file found: {path} (PID {pid})")]
    AlreadyRunning { path: PathBuf, pid: u32 },

    #[error("output path error: {0}")]
    OutputPath(String),

    #[error("failed to start child process: {0}")]
    ChildSpawn(String),

    #[error("could not forward signal to child {pid}: process already exited")]
    SignalForward { pid: u32 },

    #[error("PID file error: {0}")]
    PidFile(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::UnsupportedPlatform(_) => "CORE001",
            CoreError::AlreadyRunning { .. } => "CORE002",
            CoreError::OutputPath(_) => "CORE003",
            CoreError::ChildSpawn(_) => "CORE004",
            CoreError::SignalForward { .. } => "CORE005",
            CoreError::PidFile(_) => "CORE006",
            CoreError::Config(_) => "CORE007",
            CoreError::Io(_) => "CORE008",
        }
    }

    /// Whether this error is fatal for the launch. Everything except a missed
    /// signal forward aborts the launcher; a missed forward is logged and the
    /// supervisor proceeds to exit.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoreError::SignalForward { .. })
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;
