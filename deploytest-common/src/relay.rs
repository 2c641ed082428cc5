//! Run a command in its own process group and relay its output.
//!
//! Stdout and stderr are piped and drained line by line on two threads, one
//! per stream, so neither pipe can fill up while the other is being read.

use std::process::Stdio;

use tracing::{debug, info};

use crate::errors::{HarnessError, HarnessResult};
use crate::runner::{CommandSpec, LineSink, StreamDrains, spawn_error};
use crate::terminate::GracefulTerminator;

/// Exit code reported when the child was killed by a signal.
const SIGNALLED_EXIT_CODE: i32 = 1;

/// Run `spec` isolated by `terminator`, forwarding its output, and return its
/// exit code.
pub fn relay(spec: &CommandSpec, terminator: &dyn GracefulTerminator) -> HarnessResult<i32> {
    let mut cmd = spec.to_command();
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    terminator.isolate(&mut cmd);

    info!("Running: {}", spec.display());
    let mut child = cmd.spawn().map_err(|e| spawn_error(spec, e))?;
    let pid = child.id();
    let drains = StreamDrains::start(&mut child, LineSink::Forward);

    let status = child
        .wait()
        .map_err(|e| HarnessError::io(format!("waiting for {}", spec.display()), e))?;
    drains.join();
    debug!(pid, %status, "Relayed command finished");

    Ok(status.code().unwrap_or(SIGNALLED_EXIT_CODE))
}
