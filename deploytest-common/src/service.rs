//! Lifecycle of the cache-server child process.
//!
//! [`ServiceManager`] owns at most one running service. Its combined
//! stdout/stderr goes to an output file that is truncated on every start,
//! so after [`ServiceManager::restart`] the file only holds the new run.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{HarnessError, HarnessResult};
use crate::handle::ProcessHandle;
use crate::runner::{CommandSpec, spawn_error};
use crate::terminate::{GracefulTerminator, StopTimeouts, reap_after_kill};

/// Launch parameters remembered for restarts.
#[derive(Debug, Clone)]
struct Launch {
    spec: CommandSpec,
    output: PathBuf,
}

/// Starts, stops and restarts a single service process.
#[derive(Debug)]
pub struct ServiceManager {
    terminator: Box<dyn GracefulTerminator>,
    warmup: Duration,
    timeouts: StopTimeouts,
    handle: Option<ProcessHandle>,
    launch: Option<Launch>,
}

impl ServiceManager {
    pub fn new(
        terminator: Box<dyn GracefulTerminator>,
        warmup: Duration,
        timeouts: StopTimeouts,
    ) -> Self {
        Self {
            terminator,
            warmup,
            timeouts,
            handle: None,
            launch: None,
        }
    }

    /// Spawn the service and wait out the warm-up delay.
    ///
    /// Stdin is disconnected and stdout/stderr are merged into `output`,
    /// which is truncated first. A service that is already running is
    /// stopped before the new one starts.
    pub fn start(&mut self, argv: &[OsString], cwd: &Path, output: &Path) -> HarnessResult<u32> {
        let spec = CommandSpec::from_argv(argv)
            .ok_or_else(|| HarnessError::Spawn {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            })?
            .current_dir(cwd);
        self.launch(Launch {
            spec,
            output: output.to_path_buf(),
        })
    }

    fn launch(&mut self, launch: Launch) -> HarnessResult<u32> {
        if self.is_running() {
            warn!("Service already running; stopping it before starting a new one");
            self.stop()?;
        }

        let out = open_fresh_output(&launch.output)
            .map_err(|e| HarnessError::io(format!("creating {}", launch.output.display()), e))?;
        let err = out
            .try_clone()
            .map_err(|e| HarnessError::io("duplicating service output handle", e))?;

        let mut cmd = launch.spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err));
        self.terminator.isolate(&mut cmd);

        info!("Running: {}", launch.spec.display());
        let child = cmd.spawn().map_err(|e| spawn_error(&launch.spec, e))?;
        let mut handle = ProcessHandle::new(child);
        let pid = handle.pid();
        if let Err(e) = self.terminator.adopt(&mut handle) {
            warn!(pid, "Could not track the service's descendants: {e}");
        }
        info!(
            pid,
            output = %launch.output.display(),
            warmup = ?self.warmup,
            "Service started"
        );
        self.handle = Some(handle);
        self.launch = Some(launch);

        std::thread::sleep(self.warmup);
        if let Some(status) = self.handle.as_mut().and_then(|h| h.poll_exit().ok().flatten()) {
            warn!(pid, %status, "Service exited during warm-up");
        }
        Ok(pid)
    }

    /// Stop the service through the termination protocol.
    ///
    /// Stopping an already-stopped service returns its recorded exit status.
    /// On return neither the service nor anything it forked is running,
    /// including when the result is [`HarnessError::TerminationTimeout`].
    pub fn stop(&mut self) -> HarnessResult<ExitStatus> {
        let handle = self
            .handle
            .as_mut()
            .ok_or(HarnessError::NotStarted)?;
        if let Some(status) = handle.recorded_exit() {
            if !self.terminator.group_alive(handle)? {
                debug!(pid = handle.pid(), %status, "Service already stopped");
                return Ok(status);
            }
        }
        let status = self.terminator.request_stop(handle, self.timeouts)?;
        info!(
            pid = handle.pid(),
            %status,
            started_at = %handle.started_at(),
            uptime = ?handle.uptime(),
            "Service stopped"
        );
        Ok(status)
    }

    /// Stop, then start again with the same command, cwd and output file.
    ///
    /// The output file is reset; nothing from the previous run survives.
    pub fn restart(&mut self) -> HarnessResult<u32> {
        let launch = self
            .launch
            .clone()
            .ok_or(HarnessError::NotStarted)?;
        self.stop()?;
        info!("Restarting service");
        self.launch(launch)
    }

    /// True while the service or any process it forked is alive.
    pub fn is_running(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        // A failed group probe counts as alive so cleanup still stops it.
        handle.is_running() || self.terminator.group_alive(handle).unwrap_or(true)
    }

    /// Pid of the current (or last) service process.
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(ProcessHandle::pid)
    }

    /// Cleanup fallback: kill without a grace window, then wait up to `wait`.
    pub fn force_kill(&mut self, wait: Duration) -> HarnessResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        warn!(pid = handle.pid(), "Force-killing service");
        self.terminator.force(handle)?;
        if reap_after_kill(self.terminator.as_ref(), handle, wait)? {
            Ok(())
        } else {
            Err(HarnessError::TerminationTimeout {
                pid: handle.pid(),
                grace: wait,
            })
        }
    }

    /// Path of the output file of the current (or last) run.
    pub fn output_path(&self) -> Option<&Path> {
        self.launch.as_ref().map(|l| l.output.as_path())
    }

    /// Contents of the output file, if it exists.
    pub fn output_contents(&self) -> Option<String> {
        let path = self.output_path()?;
        std::fs::read(path)
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.force_kill(self.timeouts.kill_wait) {
                warn!("Failed to kill service on drop: {e}");
            }
        }
    }
}

/// Truncate `path`, then reopen it in append mode so the service's stdout
/// and stderr writes interleave instead of overwriting each other.
fn open_fresh_output(path: &Path) -> std::io::Result<File> {
    File::create(path)?;
    OpenOptions::new().append(true).open(path)
}
