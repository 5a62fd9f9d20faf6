//! Integration tests for the supervisor run loop
//!
//! These exercise the run loop against real processes: exit-code
//! propagation, the terminate relay, and PID-file cleanup on every exit
//! path. Daemonization itself (fork + setsid) cannot run inside the test
//! harness, so the tests attach to an acquired PID file the way an
//! embedding caller would.

#![cfg(unix)]

use pharos_core::config::LaunchSpec;
use pharos_core::pidfile::{pid_alive, PidFile};
use pharos_core::supervisor::{run_with_shutdown, shutdown_channel, Handle};
use pharos_core::CoreError;
use std::path::Path;
use std::time::Duration;

fn spec_in(dir: &Path, executable: &str, args: &[&str]) -> LaunchSpec {
    LaunchSpec {
        executable: executable.into(),
        args: args.iter().map(|s| s.to_string()).collect(),
        output_file: dir.join("server.out"),
        pid_file: dir.join("server.pid"),
    }
}

fn attach(spec: &LaunchSpec) -> Handle {
    let pid_file =
        PidFile::acquire(&spec.pid_file, std::process::id()).expect("failed to acquire PID file");
    Handle::attached(pid_file)
}

/// Poll until the PID disappears from the process table, within a bound.
async fn wait_until_dead(pid: u32, bound: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < bound {
        if !pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn child_exit_code_propagates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(dir.path(), "sh", &["-c", "exit 7"]);
    let handle = attach(&spec);
    let (_trigger, shutdown) = shutdown_channel();

    let code = run_with_shutdown(handle, &spec, shutdown)
        .await
        .expect("run should succeed");
    assert_eq!(code, 7);
    // PID file released on the natural-exit path
    assert!(!spec.pid_file.exists());
}

#[tokio::test]
async fn successful_child_yields_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(dir.path(), "true", &[]);
    let handle = attach(&spec);
    let (_trigger, shutdown) = shutdown_channel();

    let code = run_with_shutdown(handle, &spec, shutdown)
        .await
        .expect("run should succeed");
    assert_eq!(code, 0);
}

#[tokio::test]
async fn terminate_relay_stops_child_and_exits_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let child_pid_path = dir.path().join("child-self.pid");
    // The child records its own PID so the test can verify it is gone after
    // the relay fires.
    let script = format!("echo $$ > {}; exec sleep 30", child_pid_path.display());
    let spec = spec_in(dir.path(), "sh", &["-c", &script]);
    let handle = attach(&spec);

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.trigger();
    });

    let code = run_with_shutdown(handle, &spec, shutdown)
        .await
        .expect("run should succeed");
    // Supervisor exit is 0 on the signal path even though the child dies by
    // signal; the two are decoupled by contract.
    assert_eq!(code, 0);
    assert!(!spec.pid_file.exists());

    let child_pid: u32 = std::fs::read_to_string(&child_pid_path)
        .expect("child should have recorded its PID")
        .trim()
        .parse()
        .expect("child PID should parse");
    assert!(
        wait_until_dead(child_pid, Duration::from_secs(2)).await,
        "child {child_pid} should be gone shortly after the relay"
    );
}

#[tokio::test]
async fn terminate_before_start_still_exits_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(dir.path(), "sleep", &["30"]);
    let handle = attach(&spec);

    let (trigger, shutdown) = shutdown_channel();
    trigger.trigger();

    let code = run_with_shutdown(handle, &spec, shutdown)
        .await
        .expect("run should succeed");
    assert_eq!(code, 0);
    assert!(!spec.pid_file.exists());
}

#[tokio::test]
async fn spawn_failure_cleans_up_pid_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = spec_in(dir.path(), "pharos_no_such_binary_12345", &[]);
    let handle = attach(&spec);
    assert!(spec.pid_file.exists());
    let (_trigger, shutdown) = shutdown_channel();

    let err = run_with_shutdown(handle, &spec, shutdown)
        .await
        .expect_err("spawn should fail");
    assert!(matches!(err, CoreError::ChildSpawn(_)));
    // Failure-path cleanup: no leftover PID file to block the next attempt
    assert!(!spec.pid_file.exists());
}
