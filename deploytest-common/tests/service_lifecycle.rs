//! Service start/stop/restart against `sh` stand-in services.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use common::{group_running, init_test_logging, pid_alive, sh, wait_until_dead};
use deploytest_common::terminate::SignalTerminator;
use deploytest_common::{HarnessError, ServiceManager, StopTimeouts};
use tracing::info;

fn manager(grace: Duration) -> ServiceManager {
    ServiceManager::new(
        Box::new(SignalTerminator),
        Duration::from_millis(200),
        StopTimeouts {
            grace,
            kill_wait: Duration::from_secs(5),
        },
    )
}

#[test]
fn test_stop_twice_returns_same_status() {
    init_test_logging();
    info!(test = "test_stop_twice_returns_same_status", phase = "setup");

    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    let mut service = manager(Duration::from_secs(5));
    service
        .start(&sh("exec sleep 30"), tmp.path(), &output)
        .unwrap();
    assert!(service.is_running());

    let first = service.stop().unwrap();
    let second = service.stop().unwrap();
    info!(
        test = "test_stop_twice_returns_same_status",
        phase = "assert",
        first = %first,
        second = %second
    );
    assert_eq!(first, second);
    assert!(!service.is_running());
}

#[test]
fn test_stop_after_natural_exit_is_noop() {
    init_test_logging();
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    let mut service = manager(Duration::from_secs(5));
    service.start(&sh("exit 3"), tmp.path(), &output).unwrap();

    let first = service.stop().unwrap();
    assert_eq!(first.code(), Some(3));
    assert_eq!(service.stop().unwrap(), first);
}

#[test]
fn test_restart_clears_output() {
    init_test_logging();
    info!(test = "test_restart_clears_output", phase = "setup");

    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    let mut service = manager(Duration::from_secs(5));
    let first_pid = service
        .start(&sh("echo run-$$; exec sleep 30"), tmp.path(), &output)
        .unwrap();
    let before = service.output_contents().unwrap();
    assert!(before.contains(&format!("run-{first_pid}")), "{before:?}");

    let second_pid = service.restart().unwrap();
    assert_ne!(first_pid, second_pid);
    assert!(wait_until_dead(first_pid, Duration::from_secs(5)));

    let after = std::fs::read_to_string(&output).unwrap();
    info!(test = "test_restart_clears_output", phase = "assert", after = %after);
    assert!(!after.contains(&format!("run-{first_pid}")), "{after:?}");
    assert!(after.contains(&format!("run-{second_pid}")), "{after:?}");

    service.stop().unwrap();
}

/// The launch script forks the service and the service shuts down slowly.
const FORKING_SLOW_SERVICE: &str = "echo run-$$; \
    ( trap 'sleep 1; echo late-output; exit 0' TERM; while :; do sleep 0.1; done ) & \
    wait";

#[test]
fn test_stop_waits_for_forked_service() {
    init_test_logging();
    info!(test = "test_stop_waits_for_forked_service", phase = "setup");

    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    let mut service = manager(Duration::from_secs(10));
    let pid = service
        .start(&sh(FORKING_SLOW_SERVICE), tmp.path(), &output)
        .unwrap();

    service.stop().unwrap();

    let contents = service.output_contents().unwrap();
    info!(test = "test_stop_waits_for_forked_service", phase = "assert", output = %contents);
    assert!(!group_running(pid), "process group {pid} outlived stop");
    assert!(!service.is_running());
    assert!(contents.contains("late-output"), "{contents:?}");
}

#[test]
fn test_restart_after_slow_forked_shutdown_clears_output() {
    init_test_logging();
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    let mut service = manager(Duration::from_secs(10));
    let first_pid = service
        .start(&sh(FORKING_SLOW_SERVICE), tmp.path(), &output)
        .unwrap();

    let second_pid = service.restart().unwrap();
    assert!(!group_running(first_pid));

    // Give a straggler from the first run time to write, if one survived.
    std::thread::sleep(Duration::from_millis(1_500));
    let after = std::fs::read_to_string(&output).unwrap();
    info!(
        test = "test_restart_after_slow_forked_shutdown_clears_output",
        phase = "assert",
        after = %after
    );
    assert!(!after.contains("late-output"), "{after:?}");
    assert!(after.contains(&format!("run-{second_pid}")), "{after:?}");

    service.stop().unwrap();
}

#[test]
fn test_start_truncates_existing_output() {
    init_test_logging();
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    std::fs::write(&output, "left over from an earlier run\n").unwrap();

    let mut service = manager(Duration::from_secs(5));
    service
        .start(&sh("echo fresh; exec sleep 30"), tmp.path(), &output)
        .unwrap();
    assert_eq!(service.output_contents().unwrap(), "fresh\n");
    service.stop().unwrap();
}

#[test]
fn test_stdout_and_stderr_share_output_file() {
    init_test_logging();
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    let mut service = manager(Duration::from_secs(5));
    service
        .start(
            &sh("echo to-stdout; echo to-stderr >&2; exec sleep 30"),
            tmp.path(),
            &output,
        )
        .unwrap();

    let contents = service.output_contents().unwrap();
    assert!(contents.contains("to-stdout"));
    assert!(contents.contains("to-stderr"));
    service.stop().unwrap();
}

#[test]
fn test_service_stdin_is_disconnected() {
    init_test_logging();
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    let mut service = manager(Duration::from_secs(5));
    // `cat` returns immediately on a null stdin instead of blocking.
    service
        .start(&sh("cat; echo stdin-closed; exec sleep 30"), tmp.path(), &output)
        .unwrap();
    assert!(service.output_contents().unwrap().contains("stdin-closed"));
    service.stop().unwrap();
}

#[test]
fn test_grace_window_shorter_than_shutdown_forces_kill() {
    init_test_logging();
    info!(test = "test_grace_window_shorter_than_shutdown_forces_kill", phase = "setup");

    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    let mut service = manager(Duration::from_millis(300));
    let pid = service
        .start(&sh("trap '' TERM; sleep 30"), tmp.path(), &output)
        .unwrap();

    let started = Instant::now();
    let err = service.stop().unwrap_err();
    info!(
        test = "test_grace_window_shorter_than_shutdown_forces_kill",
        phase = "assert",
        error = %err,
        elapsed_ms = started.elapsed().as_millis() as u64
    );
    assert!(
        matches!(err, HarnessError::TerminationTimeout { pid: p, .. } if p == pid),
        "{err}"
    );
    assert!(err.is_fatal_termination());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!service.is_running());
    assert!(!pid_alive(pid));
}

#[test]
fn test_missing_launch_script_is_spawn_error() {
    init_test_logging();
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");
    let mut service = manager(Duration::from_secs(5));
    let argv = vec![tmp.path().join("run_bare.sh").into_os_string()];

    let err = service.start(&argv, tmp.path(), &output).unwrap_err();
    assert!(matches!(err, HarnessError::Spawn { .. }), "{err}");
    assert!(!service.is_running());
}

#[test]
fn test_stop_before_start() {
    let mut service = manager(Duration::from_secs(1));
    assert!(matches!(service.stop(), Err(HarnessError::NotStarted)));
    assert!(matches!(service.restart(), Err(HarnessError::NotStarted)));
    assert!(service.pid().is_none());
    assert!(service.output_contents().is_none());
}

#[test]
fn test_force_kill_and_drop() {
    init_test_logging();
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("bb-output.txt");

    let mut service = manager(Duration::from_secs(5));
    let pid = service
        .start(&sh("trap '' TERM; sleep 30"), tmp.path(), &output)
        .unwrap();
    service.force_kill(Duration::from_secs(5)).unwrap();
    assert!(!pid_alive(pid));
    // Nothing left to kill.
    service.force_kill(Duration::from_secs(5)).unwrap();

    let mut dropped = manager(Duration::from_secs(5));
    let pid = dropped
        .start(&sh("exec sleep 30"), tmp.path(), &output)
        .unwrap();
    drop(dropped);
    assert!(wait_until_dead(pid, Duration::from_secs(5)));
}
