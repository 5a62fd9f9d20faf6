//! pharos launcher CLI
//!
//! Argument surface and dispatch: `pharos <server> [start]`. Without the
//! `start` positional the server runs in the foreground with inherited
//! stdio; with it, the launcher daemonizes and the supervisor takes over.
//! The process exit code equals the launched child's exit code, or the
//! negative sentinel on startup failure.

#![allow(unused_crate_dependencies)]

pub mod error;
pub use error::{CliError, Result};

use clap::{Parser, ValueEnum};
use pharos_core::{LaunchSpec, LauncherSettings};
use std::path::PathBuf;

/// Command-line surface of the launcher
#[derive(Parser, Debug)]
#[command(name = "pharos")]
#[command(about = "Launch a pharos-managed server in the foreground or as a daemon")]
#[command(version)]
pub struct Cli {
    /// Server flavor to launch (e.g. traceserver, queryserver)
    pub server: String,

    /// Pass `start` to enter daemon mode; omit to run in the foreground
    #[arg(value_enum)]
    pub command: Option<LaunchCommand>,

    /// KEY=VALUE environment-source file (JAVA_HOME, PHAROS_PID_DIR, ...)
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// The single optional positional command
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchCommand {
    /// Daemonize and supervise the server in the background
    Start,
}

/// Resolve configuration and run the requested mode, returning the exit
/// code the process should report.
pub fn launch(cli: &Cli) -> Result<i32> {
    let settings = LauncherSettings::load(cli.env_file.as_deref())?;
    let spec = settings.launch_spec(&cli.server)?;
    tracing::debug!("Resolved launch target: {}", spec.executable.display());
    match cli.command {
        Some(LaunchCommand::Start) => daemon_mode(cli, &spec),
        None => foreground_mode(cli, &spec),
    }
}

#[cfg(unix)]
fn daemon_mode(cli: &Cli, spec: &LaunchSpec) -> Result<i32> {
    use pharos_core::supervisor;

    // Last line the invoker sees before the process detaches.
    println!(
        "starting {} server, logging to {}",
        cli.server,
        spec.output_file.display()
    );

    // Forks; only the daemonized process returns. The runtime must not
    // exist before this point.
    let handle = supervisor::daemonize(spec)?;

    // stderr is redirected now, so tracing output lands in the .out file.
    pharos_core::utils::init_tracing(&cli.log_level)?;
    let runtime = build_runtime()?;
    let code = runtime.block_on(supervisor::run(handle, spec))?;
    Ok(code)
}

#[cfg(unix)]
fn foreground_mode(cli: &Cli, spec: &LaunchSpec) -> Result<i32> {
    use pharos_core::{process, supervisor};

    pharos_core::utils::init_tracing(&cli.log_level)?;
    let runtime = build_runtime()?;
    runtime.block_on(async {
        let mut child = process::spawn(spec)?;
        let status = child.wait().await?;
        Ok(supervisor::exit_code(status))
    })
}

#[cfg(unix)]
fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

#[cfg(not(unix))]
fn daemon_mode(_cli: &Cli, _spec: &LaunchSpec) -> Result<i32> {
    Err(CliError::Core(pharos_core::CoreError::UnsupportedPlatform(
        std::env::consts::OS.to_string(),
    )))
}

#[cfg(not(unix))]
fn foreground_mode(_cli: &Cli, _spec: &LaunchSpec) -> Result<i32> {
    Err(CliError::Core(pharos_core::CoreError::UnsupportedPlatform(
        std::env::consts::OS.to_string(),
    )))
}
