//! Interrupt probe: checks that the platform stop request actually stops a
//! long-running console task.
//!
//! Spawns the task isolated, lets it settle, confirms it is still alive,
//! then runs the termination protocol against it.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tracing::{error, info};

use crate::errors::{HarnessError, HarnessResult};
use crate::handle::ProcessHandle;
use crate::platform::{Platform, PlatformKind};
use crate::runner::{CommandSpec, spawn_error};
use crate::terminate::{GracefulTerminator, StopTimeouts};

pub const DEFAULT_SETTLE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub task: CommandSpec,
    /// Delay between spawn and the stop request.
    pub settle: Duration,
    pub timeouts: StopTimeouts,
}

impl ProbeConfig {
    pub fn for_platform(platform: &Platform) -> Self {
        Self {
            task: long_running_task(platform),
            settle: DEFAULT_SETTLE,
            timeouts: StopTimeouts {
                grace: Duration::from_secs(15),
                kill_wait: Duration::from_secs(5),
            },
        }
    }
}

/// A task that runs for about thirty seconds unless interrupted.
pub fn long_running_task(platform: &Platform) -> CommandSpec {
    match platform.kind {
        PlatformKind::Windows => {
            CommandSpec::new("cmd.exe").args(["/c", "ping", "-n", "30", "-w", "1000", "127.0.0.1"])
        }
        PlatformKind::Posix => CommandSpec::new("sh").args([
            "-c",
            "echo Starting long running task...; sleep 30; echo Task completed normally",
        ]),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The task exited after the stop request, within the grace window.
    Stopped(ExitStatus),
    /// The task was gone before the stop request was sent.
    DiedEarly(ExitStatus),
    /// The task ignored the stop request and was force-killed.
    Forced,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}

pub fn run_probe(
    terminator: &dyn GracefulTerminator,
    config: &ProbeConfig,
) -> HarnessResult<ProbeOutcome> {
    let mut cmd = config.task.to_command();
    cmd.stdin(Stdio::null());
    terminator.isolate(&mut cmd);

    info!("Running: {}", config.task.display());
    let child = cmd.spawn().map_err(|e| spawn_error(&config.task, e))?;
    let mut handle = ProcessHandle::new(child);
    terminator.adopt(&mut handle)?;
    info!(pid = handle.pid(), "Started long-running task");

    std::thread::sleep(config.settle);
    if let Some(status) = handle.poll_exit()? {
        error!(pid = handle.pid(), %status, "Task died before the stop request");
        return Ok(ProbeOutcome::DiedEarly(status));
    }

    match terminator.request_stop(&mut handle, config.timeouts) {
        Ok(status) => {
            info!(pid = handle.pid(), %status, "Task stopped");
            Ok(ProbeOutcome::Stopped(status))
        }
        Err(HarnessError::TerminationTimeout { pid, .. }) => {
            error!(pid, "Task did not stop after the stop request");
            Ok(ProbeOutcome::Forced)
        }
        Err(e) => Err(e),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::terminate::SignalTerminator;
    use serial_test::serial;

    fn config(task: CommandSpec, grace_ms: u64) -> ProbeConfig {
        ProbeConfig {
            task,
            settle: Duration::from_millis(200),
            timeouts: StopTimeouts {
                grace: Duration::from_millis(grace_ms),
                kill_wait: Duration::from_secs(5),
            },
        }
    }

    #[test]
    #[serial(interrupt)]
    fn test_probe_stops_default_task() {
        let platform = Platform {
            kind: PlatformKind::Posix,
            os_label: "Linux".into(),
        };
        let outcome = run_probe(
            &SignalTerminator,
            &config(long_running_task(&platform), 5_000),
        )
        .unwrap();
        assert!(outcome.is_success(), "{outcome:?}");
    }

    #[test]
    #[serial(interrupt)]
    fn test_probe_detects_early_death() {
        let task = CommandSpec::new("sh").args(["-c", "exit 0"]);
        let outcome = run_probe(&SignalTerminator, &config(task, 1_000)).unwrap();
        assert!(matches!(outcome, ProbeOutcome::DiedEarly(_)));
    }

    #[test]
    #[serial(interrupt)]
    fn test_probe_reports_forced_kill() {
        let task = CommandSpec::new("sh").args(["-c", "trap '' TERM; sleep 30"]);
        let outcome = run_probe(&SignalTerminator, &config(task, 300)).unwrap();
        assert_eq!(outcome, ProbeOutcome::Forced);
    }
}
