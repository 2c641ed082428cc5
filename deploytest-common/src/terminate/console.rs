//! Windows termination: `CTRL_BREAK` to the child's console process group.
//!
//! A process cannot signal a detached console process the POSIX way. The
//! closest equivalent is a console control event addressed to a process
//! group, which only works if the child was created with
//! `CREATE_NEW_PROCESS_GROUP`. Group 0 would broadcast to every process on
//! the console, the harness included.
//!
//! Console groups cannot be enumerated, so the child is also placed in a job
//! object. Processes it starts inherit the job, which gives both a live count
//! for the whole tree and a way to kill it.

use std::os::windows::io::AsRawHandle;
use std::os::windows::process::CommandExt;
use std::process::Command;

use tracing::{debug, warn};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};
use windows::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JOBOBJECT_BASIC_ACCOUNTING_INFORMATION,
    JobObjectBasicAccountingInformation, QueryInformationJobObject, TerminateJobObject,
};
use windows::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;

use super::GracefulTerminator;
use crate::errors::{HarnessError, HarnessResult};
use crate::handle::ProcessHandle;
use crate::runner::{CommandSpec, run_command_captured};

/// Owned job object handle, closed on drop.
#[derive(Debug)]
pub(crate) struct JobGuard(HANDLE);

impl Drop for JobGuard {
    fn drop(&mut self) {
        // SAFETY: the handle came from CreateJobObjectW and is closed once.
        #[allow(unsafe_code)]
        let closed = unsafe { CloseHandle(self.0) };
        if let Err(e) = closed {
            warn!("Failed to close job handle: {e}");
        }
    }
}

fn win_error(action: &'static str, pid: u32, e: windows::core::Error) -> HarnessError {
    HarnessError::Signal {
        action,
        pid,
        reason: e.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleBreakTerminator;

impl GracefulTerminator for ConsoleBreakTerminator {
    fn name(&self) -> &'static str {
        "console-break"
    }

    fn isolate(&self, cmd: &mut Command) {
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP.0);
    }

    fn adopt(&self, handle: &mut ProcessHandle) -> HarnessResult<()> {
        let pid = handle.pid();
        // SAFETY: no security attributes and no name; the result is checked.
        #[allow(unsafe_code)]
        let job = unsafe { CreateJobObjectW(None, None) }
            .map_err(|e| win_error("CreateJobObjectW", pid, e))?;
        let job = JobGuard(job);

        // SAFETY: both handles are valid for the duration of the call.
        #[allow(unsafe_code)]
        let assigned =
            unsafe { AssignProcessToJobObject(job.0, HANDLE(handle.child().as_raw_handle())) };
        assigned.map_err(|e| win_error("AssignProcessToJobObject", pid, e))?;

        debug!(pid, "Process assigned to job object");
        handle.set_job(job);
        Ok(())
    }

    fn group_alive(&self, handle: &ProcessHandle) -> HarnessResult<bool> {
        let Some(job) = handle.job() else {
            return Ok(false);
        };
        let mut info = JOBOBJECT_BASIC_ACCOUNTING_INFORMATION::default();
        // SAFETY: `info` is a correctly sized, writable accounting struct.
        #[allow(unsafe_code)]
        let queried = unsafe {
            QueryInformationJobObject(
                Some(job.0),
                JobObjectBasicAccountingInformation,
                &mut info as *mut _ as _,
                std::mem::size_of_val(&info) as u32,
                None,
            )
        };
        queried.map_err(|e| win_error("QueryInformationJobObject", handle.pid(), e))?;
        Ok(info.ActiveProcesses > 0)
    }

    fn deliver(&self, handle: &ProcessHandle) -> HarnessResult<()> {
        let pid = handle.pid();
        // SAFETY: plain Win32 call with integer arguments; no pointers involved.
        #[allow(unsafe_code)]
        let result = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
        result.map_err(|e| win_error("CTRL_BREAK", pid, e))
    }

    fn force(&self, handle: &mut ProcessHandle) -> HarnessResult<()> {
        let pid = handle.pid();
        if let Some(job) = handle.job() {
            // SAFETY: the job handle is owned by `handle` and still open.
            #[allow(unsafe_code)]
            let terminated = unsafe { TerminateJobObject(job.0, 1) };
            if let Err(e) = terminated {
                warn!(pid, "TerminateJobObject failed: {e}");
            }
        } else {
            // TerminateProcess on cmd.exe alone would orphan the service it started.
            let pid_arg = pid.to_string();
            let taskkill = CommandSpec::new("taskkill").args(["/PID", pid_arg.as_str(), "/T", "/F"]);
            match run_command_captured(&taskkill, false) {
                Ok(output) if output.success() => debug!(pid, "taskkill succeeded"),
                Ok(output) => debug!(
                    pid,
                    code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "taskkill reported failure"
                ),
                Err(e) => warn!(pid, "Could not run taskkill: {e}"),
            }
        }
        handle.kill()
    }
}
