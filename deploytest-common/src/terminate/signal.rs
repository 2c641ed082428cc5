//! POSIX termination: `SIGTERM`/`SIGKILL` to the child's process group.

use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use tracing::debug;

use super::GracefulTerminator;
use crate::errors::{HarnessError, HarnessResult};
use crate::handle::ProcessHandle;

/// Signals the whole process group the child leads.
///
/// The launch script usually forks the real service, so signalling only the
/// direct child would leave the service running.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalTerminator;

impl SignalTerminator {
    fn send(
        &self,
        handle: &ProcessHandle,
        signal: Signal,
        action: &'static str,
    ) -> HarnessResult<()> {
        let pid = handle.pid();
        let target = Pid::from_raw(pid as i32);
        match killpg(target, signal) {
            Ok(()) => Ok(()),
            // A reaped pid may already belong to someone else.
            Err(Errno::ESRCH) if handle.recorded_exit().is_some() => Ok(()),
            // Not a group leader (spawned without isolation); fall back to the pid.
            Err(Errno::ESRCH) => {
                debug!(pid, ?signal, "No process group; signalling pid directly");
                match kill(target, signal) {
                    Ok(()) | Err(Errno::ESRCH) => Ok(()),
                    Err(e) => Err(signal_error(action, pid, e)),
                }
            }
            Err(e) => Err(signal_error(action, pid, e)),
        }
    }
}

fn signal_error(action: &'static str, pid: u32, errno: Errno) -> HarnessError {
    HarnessError::Signal {
        action,
        pid,
        reason: errno.desc().to_string(),
    }
}

/// Whether a process other than a zombie is left in group `pgid`.
///
/// `killpg(.., None)` also succeeds for zombies, and orphaned zombies stay
/// around until whoever adopted them reaps them. `None` when `/proc` is not
/// available.
#[cfg(target_os = "linux")]
fn live_member(pgid: u32) -> Option<bool> {
    let entries = std::fs::read_dir("/proc").ok()?;
    let live = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
        })
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .any(|stat| {
            // `pid (comm) state ppid pgrp ...`; comm may contain spaces and parens.
            let Some((_, rest)) = stat.rsplit_once(')') else {
                return false;
            };
            let mut fields = rest.split_whitespace();
            let state = fields.next();
            let pgrp = fields.nth(1).and_then(|f| f.parse::<u32>().ok());
            pgrp == Some(pgid) && !matches!(state, Some("Z" | "X"))
        });
    Some(live)
}

#[cfg(not(target_os = "linux"))]
fn live_member(_pgid: u32) -> Option<bool> {
    None
}

impl GracefulTerminator for SignalTerminator {
    fn name(&self) -> &'static str {
        "posix-signal"
    }

    fn isolate(&self, cmd: &mut Command) {
        cmd.process_group(0);
    }

    fn group_alive(&self, handle: &ProcessHandle) -> HarnessResult<bool> {
        let pid = handle.pid();
        match killpg(Pid::from_raw(pid as i32), None) {
            Err(Errno::ESRCH) => Ok(false),
            Ok(()) | Err(Errno::EPERM) => Ok(live_member(pid).unwrap_or(true)),
            Err(e) => Err(signal_error("group probe", pid, e)),
        }
    }

    fn deliver(&self, handle: &ProcessHandle) -> HarnessResult<()> {
        self.send(handle, Signal::SIGTERM, "SIGTERM")
    }

    fn force(&self, handle: &mut ProcessHandle) -> HarnessResult<()> {
        self.send(handle, Signal::SIGKILL, "SIGKILL")?;
        handle.kill()
    }
}
