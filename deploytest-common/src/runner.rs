//! Synchronous execution of external commands.
//!
//! Every invocation is logged as `Running: <argv>`. A non-zero exit becomes
//! [`HarnessError::CommandFailed`] unless the caller passes `check = false`.

use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::{HarnessError, HarnessResult};

/// Description of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Build from an argument vector whose first element is the program.
    ///
    /// Returns `None` for an empty vector.
    pub fn from_argv<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut iter = argv.into_iter();
        let program = iter.next()?;
        Some(Self::new(program).args(iter))
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Space-joined argv for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// A `std::process::Command` carrying program, args, cwd and env.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

/// Result of a command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    /// Check if the command succeeded (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run a command with inherited stdio so its output streams to the console.
pub fn run_command(spec: &CommandSpec, check: bool) -> HarnessResult<CommandOutput> {
    info!("Running: {}", spec.display());
    let start = Instant::now();
    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null());

    let status = cmd
        .spawn()
        .map_err(|e| spawn_error(spec, e))?
        .wait()
        .map_err(|e| HarnessError::io(format!("waiting for {}", spec.display()), e))?;

    finish(spec, status, String::new(), String::new(), start, check)
}

/// Run a command and capture stdout and stderr.
///
/// Each stream is drained on its own thread so a chatty child never blocks
/// on a full pipe while the parent waits on the other one.
pub fn run_command_captured(spec: &CommandSpec, check: bool) -> HarnessResult<CommandOutput> {
    info!("Running: {}", spec.display());
    let start = Instant::now();
    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| spawn_error(spec, e))?;
    let drains = StreamDrains::start(&mut child, LineSink::Capture);
    let status = child
        .wait()
        .map_err(|e| HarnessError::io(format!("waiting for {}", spec.display()), e))?;
    let (stdout, stderr) = drains.join();

    finish(spec, status, stdout, stderr, start, check)
}

pub(crate) fn spawn_error(spec: &CommandSpec, source: std::io::Error) -> HarnessError {
    HarnessError::Spawn {
        program: spec.program.to_string_lossy().into_owned(),
        source,
    }
}

fn finish(
    spec: &CommandSpec,
    status: ExitStatus,
    stdout: String,
    stderr: String,
    start: Instant,
    check: bool,
) -> HarnessResult<CommandOutput> {
    let output = CommandOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        duration: start.elapsed(),
    };
    debug!(
        command = %spec.display(),
        exit_code = ?output.exit_code,
        duration_ms = output.duration.as_millis() as u64,
        "Command completed"
    );

    if !output.success() {
        if check {
            warn!("Command failed: {} ({status})", spec.display());
            return Err(HarnessError::CommandFailed {
                command: spec.display(),
                code: output.exit_code,
            });
        }
        debug!("Ignoring non-zero exit of {}", spec.display());
    }
    Ok(output)
}

/// Where drained lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSink {
    /// Keep lines in memory.
    Capture,
    /// Echo each line to the harness's own stdout/stderr as it arrives.
    Forward,
}

/// One reader thread per child stream.
pub struct StreamDrains {
    stdout: Option<thread::JoinHandle<String>>,
    stderr: Option<thread::JoinHandle<String>>,
}

impl StreamDrains {
    /// Take the child's piped stdout/stderr and start draining them.
    pub fn start(child: &mut Child, sink: LineSink) -> Self {
        let stdout = child
            .stdout
            .take()
            .map(|out| thread::spawn(move || drain_lines(out, sink, StreamKind::Stdout)));
        let stderr = child
            .stderr
            .take()
            .map(|err| thread::spawn(move || drain_lines(err, sink, StreamKind::Stderr)));
        Self { stdout, stderr }
    }

    /// Join both threads; returns whatever was captured.
    pub fn join(self) -> (String, String) {
        (join_output(self.stdout), join_output(self.stderr))
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

fn drain_lines<R: Read>(reader: R, sink: LineSink, kind: StreamKind) -> String {
    let mut captured = String::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                match sink {
                    LineSink::Capture => captured.push_str(&line),
                    LineSink::Forward => forward(&line, kind),
                }
            }
            Err(e) => {
                debug!("Stream read ended early: {e}");
                break;
            }
        }
    }
    captured
}

fn forward(line: &str, kind: StreamKind) {
    // Write errors mean our own stdout/stderr went away; nothing useful to do.
    let _ = match kind {
        StreamKind::Stdout => {
            let mut out = std::io::stdout().lock();
            out.write_all(line.as_bytes()).and_then(|()| out.flush())
        }
        StreamKind::Stderr => {
            let mut err = std::io::stderr().lock();
            err.write_all(line.as_bytes()).and_then(|()| err.flush())
        }
    };
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_argv() {
        let spec = CommandSpec::new("bazel")
            .arg("--output_base=/tmp/x")
            .args(["test", "//foo"]);
        assert_eq!(spec.display(), "bazel --output_base=/tmp/x test //foo");
    }

    #[test]
    fn test_from_argv() {
        let spec = CommandSpec::from_argv(["cmd.exe", "/c", "run_bare.cmd"]).unwrap();
        assert_eq!(spec.program(), "cmd.exe");
        assert_eq!(spec.get_args().len(), 2);
        assert!(CommandSpec::from_argv(Vec::<String>::new()).is_none());
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let spec = CommandSpec::new("definitely-not-a-real-program-7f3a");
        let err = run_command(&spec, true).unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_captured_output() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2"]);
        let output = run_command_captured(&spec, true).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_checked_and_unchecked() {
        let spec = CommandSpec::new("sh").args(["-c", "exit 3"]);

        let err = run_command(&spec, true).unwrap_err();
        match err {
            HarnessError::CommandFailed { code, .. } => assert_eq!(code, Some(3)),
            other => panic!("unexpected error: {other}"),
        }

        let output = run_command(&spec, false).unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_env_and_cwd_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo \"$OS\"; pwd"])
            .env("OS", "Linux")
            .current_dir(dir.path());
        let output = run_command_captured(&spec, true).unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("Linux"));
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_large_output_on_both_streams_does_not_deadlock() {
        // Well past the 64KiB pipe buffer on each stream.
        let spec = CommandSpec::new("sh").args([
            "-c",
            "i=0; while [ $i -lt 5000 ]; do echo line-$i-padding-padding-padding; echo err-$i-padding-padding >&2; i=$((i+1)); done",
        ]);
        let output = run_command_captured(&spec, true).unwrap();
        assert_eq!(output.stdout.lines().count(), 5000);
        assert_eq!(output.stderr.lines().count(), 5000);
    }
}
