//! Child-process ownership for the launcher
//!
//! The supervisor exclusively owns the lifetime handle of the process it
//! spawns; the handle is reaped when the child exits or the supervisor is
//! torn down. Unix is the only platform with a daemonization primitive, so
//! this module is Unix-only, matching the launcher's platform support.

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
