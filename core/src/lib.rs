//! Core functionality for the pharos launcher
//!
//! This crate contains the daemon supervisor and the launch plumbing shared
//! by the CLI: configuration layering, the PID-file guard, child-process
//! ownership, and the signal relay.

pub mod config;
pub mod error;
#[cfg(unix)]
pub mod pidfile;
#[cfg(unix)]
pub mod process;
#[cfg(unix)]
pub mod supervisor;

pub use config::{LaunchSpec, LauncherSettings};
pub use error::{CoreError, Result};

/// Core utilities and helper functions
pub mod utils {
    use tracing::debug;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::Config(e.to_string()))?;

        debug!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
