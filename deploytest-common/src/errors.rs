//! Error taxonomy for the deployment harness.
//!
//! Every scenario phase returns [`HarnessResult`]. Any error aborts the active
//! phase and sends the orchestrator straight to cleanup; cleanup itself only
//! logs errors.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::EnvError;

/// Error type for harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The child process could not be created.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external command exited with a non-zero status.
    #[error("Command failed with {}: {command}", describe_code(.code))]
    CommandFailed { command: String, code: Option<i32> },

    /// The graceful stop did not finish inside the grace window; the process
    /// was force-killed.
    #[error("Process {pid} did not exit within {grace:?} of the stop request and was force-killed")]
    TerminationTimeout { pid: u32, grace: Duration },

    /// Expected log evidence was absent.
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Stop or restart of a service that was never started.
    #[error("Service was never started")]
    NotStarted,

    /// Ctrl+C arrived between scenario phases.
    #[error("Interrupted by user")]
    Interrupted,

    /// The OS rejected the stop request itself.
    #[error("Failed to deliver {action} to process {pid}: {reason}")]
    Signal {
        action: &'static str,
        pid: u32,
        reason: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },

    #[error("Invalid configuration: {}", join_env_errors(.0))]
    Config(Vec<EnvError>),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    /// Wrap an I/O error with a short description of what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the process had to be force-killed after the grace window.
    pub fn is_fatal_termination(&self) -> bool {
        matches!(self, Self::TerminationTimeout { .. })
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn join_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_message_includes_code() {
        let err = HarnessError::CommandFailed {
            command: "bazel clean".to_string(),
            code: Some(37),
        };
        assert_eq!(err.to_string(), "Command failed with exit code 37: bazel clean");
    }

    #[test]
    fn test_command_failed_message_without_code() {
        let err = HarnessError::CommandFailed {
            command: "bazel test".to_string(),
            code: None,
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_only_timeout_is_fatal_termination() {
        let timeout = HarnessError::TerminationTimeout {
            pid: 42,
            grace: Duration::from_secs(1),
        };
        assert!(timeout.is_fatal_termination());
        assert!(!HarnessError::Assertion("x".into()).is_fatal_termination());
    }

    #[test]
    fn test_config_error_joins_all_problems() {
        let err = HarnessError::Config(vec![
            EnvError::InvalidDuration {
                var: "DEPLOYTEST_WARMUP".into(),
                value: "soon".into(),
            },
            EnvError::InvalidValue {
                var: "DEPLOYTEST_KEEP_WORKDIR".into(),
                expected: "boolean".into(),
                value: "maybe".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("DEPLOYTEST_WARMUP"));
        assert!(msg.contains("DEPLOYTEST_KEEP_WORKDIR"));
    }
}
