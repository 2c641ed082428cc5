//! Graceful termination of console-owning child processes.
//!
//! A [`GracefulTerminator`] is chosen once per run by
//! [`platform_terminator`]. It does two jobs: at spawn time it isolates the
//! child into its own process group, and at stop time it runs the escalation
//! ladder:
//!
//! 1. *Polite*: `SIGTERM` to the group, or `CTRL_BREAK` to the console group.
//! 2. *Wait*: poll in short slices until the direct child has exited and no
//!    member of its group is left, or the grace window closes. A Ctrl+C
//!    during the wait ends it early.
//! 3. *Force*: kill the whole group, a bounded reap, and
//!    [`HarnessError::TerminationTimeout`].
//!
//! The direct child is usually a launch script that forks the real service,
//! so its exit alone proves nothing.

use std::fmt;
use std::process::{Command, ExitStatus};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_GRACE_WINDOW, DEFAULT_KILL_WAIT};
use crate::errors::{HarnessError, HarnessResult};
use crate::handle::ProcessHandle;
use crate::interrupt;

#[cfg(windows)]
mod console;
#[cfg(unix)]
mod signal;

#[cfg(windows)]
pub use console::ConsoleBreakTerminator;
#[cfg(windows)]
pub(crate) use console::JobGuard;
#[cfg(unix)]
pub use signal::SignalTerminator;

/// Longest single blocking wait inside the grace window.
const POLL_SLICE: Duration = Duration::from_millis(250);

/// Interval between group checks once the direct child is gone.
const GROUP_POLL: Duration = Duration::from_millis(50);

/// Time limits for one stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTimeouts {
    /// Time allowed for a cooperative exit.
    pub grace: Duration,
    /// Bound on reaping after the forced kill.
    pub kill_wait: Duration,
}

impl Default for StopTimeouts {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE_WINDOW,
            kill_wait: DEFAULT_KILL_WAIT,
        }
    }
}

/// Platform mechanism for stopping a child that owns a console or session.
pub trait GracefulTerminator: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Configure `cmd` so the child gets its own process group and a stop
    /// request aimed at it never reaches the harness.
    fn isolate(&self, cmd: &mut Command);

    /// Start tracking the descendants of a freshly spawned child.
    fn adopt(&self, _handle: &mut ProcessHandle) -> HarnessResult<()> {
        Ok(())
    }

    /// Whether any process of the group rooted at `handle` other than the
    /// reaped direct child is still running.
    fn group_alive(&self, handle: &ProcessHandle) -> HarnessResult<bool>;

    /// Ask the process group rooted at `handle` to exit.
    fn deliver(&self, handle: &ProcessHandle) -> HarnessResult<()>;

    /// Kill the process group unconditionally.
    fn force(&self, handle: &mut ProcessHandle) -> HarnessResult<()>;

    /// Stop `handle` and every process in its group, returning the exit
    /// status of the direct child.
    ///
    /// A handle whose group is already gone returns its recorded status
    /// without sending anything. If the grace window closes first the group
    /// is force-killed and [`HarnessError::TerminationTimeout`] is returned;
    /// nothing is left running either way, unless the reap after the forced
    /// kill also timed out (logged as an error).
    fn request_stop(
        &self,
        handle: &mut ProcessHandle,
        timeouts: StopTimeouts,
    ) -> HarnessResult<ExitStatus> {
        let pid = handle.pid();
        let mut exit = handle.poll_exit()?;
        if let Some(status) = exit {
            if !self.group_alive(handle)? {
                info!(pid, %status, "Process already exited");
                return Ok(status);
            }
            debug!(pid, %status, "Direct child exited but its group is still alive");
        }

        info!(
            pid,
            terminator = self.name(),
            grace = ?timeouts.grace,
            "Requesting graceful stop"
        );
        if let Err(e) = self.deliver(handle) {
            // Lost a race with a natural exit.
            if let Some(status) = handle.poll_exit()? {
                if !self.group_alive(handle)? {
                    return Ok(status);
                }
            }
            warn!(pid, "Stop request failed ({e}); force-killing");
            self.force(handle)?;
            reap_after_kill(self, handle, timeouts.kill_wait)?;
            return Err(e);
        }

        let requested = Instant::now();
        let deadline = requested + timeouts.grace;
        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(pid, grace = ?timeouts.grace, "Process ignored the stop request; force-killing");
                break;
            }
            let slice = deadline - now;
            match exit {
                None => exit = handle.wait_for(slice.min(POLL_SLICE))?,
                Some(_) => std::thread::sleep(slice.min(GROUP_POLL)),
            }
            if let Some(status) = exit {
                if !self.group_alive(handle)? {
                    info!(
                        pid,
                        %status,
                        elapsed_ms = requested.elapsed().as_millis() as u64,
                        "Process group exited"
                    );
                    return Ok(status);
                }
            }
            if interrupt::take() {
                warn!(pid, "Interrupted while waiting for exit; force-killing");
                break;
            }
        }

        self.force(handle)?;
        reap_after_kill(self, handle, timeouts.kill_wait)?;
        Err(HarnessError::TerminationTimeout {
            pid,
            grace: timeouts.grace,
        })
    }
}

/// Wait up to `kill_wait` for the direct child to be reaped and its group to
/// disappear after a forced kill. Returns whether both happened.
pub(crate) fn reap_after_kill<T>(
    terminator: &T,
    handle: &mut ProcessHandle,
    kill_wait: Duration,
) -> HarnessResult<bool>
where
    T: GracefulTerminator + ?Sized,
{
    let pid = handle.pid();
    let deadline = Instant::now() + kill_wait;
    let Some(status) = handle.wait_for(kill_wait)? else {
        error!(pid, "Process still not reaped {kill_wait:?} after force-kill");
        return Ok(false);
    };
    while terminator.group_alive(handle)? {
        if Instant::now() >= deadline {
            error!(pid, "Process group still alive {kill_wait:?} after force-kill");
            return Ok(false);
        }
        std::thread::sleep(GROUP_POLL);
    }
    info!(pid, %status, "Process force-killed");
    Ok(true)
}

/// The terminator for the platform this binary was built for.
pub fn platform_terminator() -> Box<dyn GracefulTerminator> {
    #[cfg(unix)]
    {
        Box::new(SignalTerminator)
    }
    #[cfg(windows)]
    {
        Box::new(ConsoleBreakTerminator)
    }
}
