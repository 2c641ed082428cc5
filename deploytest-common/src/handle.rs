//! Handle to a spawned child process.

use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use wait_timeout::ChildExt;

use crate::errors::{HarnessError, HarnessResult};

/// A spawned child and whatever is known about its exit.
///
/// Once an exit status has been observed it is recorded and every later
/// query returns it without touching the OS again.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Child,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    exit: Option<ExitStatus>,
    /// Job object tracking the child's descendants.
    #[cfg(windows)]
    job: Option<crate::terminate::JobGuard>,
}

impl ProcessHandle {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            exit: None,
            #[cfg(windows)]
            job: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_wall
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    #[cfg(windows)]
    pub(crate) fn child(&self) -> &Child {
        &self.child
    }

    #[cfg(windows)]
    pub(crate) fn job(&self) -> Option<&crate::terminate::JobGuard> {
        self.job.as_ref()
    }

    #[cfg(windows)]
    pub(crate) fn set_job(&mut self, job: crate::terminate::JobGuard) {
        self.job = Some(job);
    }

    /// Exit status recorded by an earlier poll or wait.
    pub fn recorded_exit(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Non-blocking check for exit.
    pub fn poll_exit(&mut self) -> HarnessResult<Option<ExitStatus>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        let status = self
            .child
            .try_wait()
            .map_err(|e| HarnessError::io(format!("polling process {}", self.pid), e))?;
        self.exit = status;
        Ok(status)
    }

    /// Wait up to `timeout` for exit.
    pub fn wait_for(&mut self, timeout: Duration) -> HarnessResult<Option<ExitStatus>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        let status = self
            .child
            .wait_timeout(timeout)
            .map_err(|e| HarnessError::io(format!("waiting for process {}", self.pid), e))?;
        self.exit = status;
        Ok(status)
    }

    /// True until an exit has been observed.
    pub fn is_running(&mut self) -> bool {
        // An error from try_wait means the child is no longer ours to query.
        matches!(self.poll_exit(), Ok(None))
    }

    /// Unconditional kill of the child itself (`SIGKILL` / `TerminateProcess`).
    pub fn kill(&mut self) -> HarnessResult<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited but not yet reaped.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(HarnessError::Signal {
                action: "force-kill",
                pid: self.pid,
                reason: e.to_string(),
            }),
        }
    }
}
