//! The verify, restart, re-verify scenario.
//!
//! Phases run strictly in order. The first error jumps to cleanup, which
//! always runs and only logs its own failures so the real outcome is never
//! masked.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::build_tool::BuildTool;
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::interrupt;
use crate::log_check::{self, Predicate};
use crate::platform::Platform;
use crate::service::ServiceManager;
use crate::terminate::{GracefulTerminator, StopTimeouts};
use crate::workdir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioPhase {
    Preparing,
    Generating,
    FirstRun,
    Restarting,
    SecondRun,
    CleaningUp,
    Done,
}

impl fmt::Display for ScenarioPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preparing => "preparing",
            Self::Generating => "generating",
            Self::FirstRun => "first-run",
            Self::Restarting => "restarting",
            Self::SecondRun => "second-run",
            Self::CleaningUp => "cleaning-up",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

/// What happened during one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub outcome: Outcome,
    /// Phase that was active when the scenario failed.
    pub failed_phase: Option<ScenarioPhase>,
    /// Pids of every service process started, in order.
    pub service_pids: Vec<u32>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Service output captured before cleanup, on failure only.
    pub server_output: Option<String>,
}

impl ScenarioReport {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Failure text to stderr and the service output dump to stdout.
    pub fn print_diagnostics(&self) {
        let Outcome::Failure(message) = &self.outcome else {
            return;
        };
        eprintln!("Test failed: {message}");
        if let Some(output) = &self.server_output {
            let mut stdout = std::io::stdout().lock();
            // Nothing sensible to do if our own stdout is gone.
            let _ = writeln!(stdout, "Server output:")
                .and_then(|()| writeln!(stdout, "{output}"))
                .and_then(|()| stdout.flush());
        }
    }
}

/// One end-to-end run against a build tool `B`.
pub struct Scenario<B: BuildTool> {
    config: HarnessConfig,
    platform: Platform,
    build: B,
    service: ServiceManager,
    phase: ScenarioPhase,
    service_pids: Vec<u32>,
}

impl<B: BuildTool> Scenario<B> {
    pub fn new(
        config: HarnessConfig,
        platform: Platform,
        build: B,
        terminator: Box<dyn GracefulTerminator>,
    ) -> Self {
        let service = ServiceManager::new(
            terminator,
            config.warmup,
            StopTimeouts {
                grace: config.grace_window,
                kill_wait: config.kill_wait,
            },
        );
        Self {
            config,
            platform,
            build,
            service,
            phase: ScenarioPhase::Preparing,
            service_pids: Vec::new(),
        }
    }

    /// Run every phase, then clean up.
    pub fn run(mut self) -> ScenarioReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            root = %self.config.root.display(),
            workdir = %self.config.workdir().display(),
            "Starting bare deployment test"
        );

        let result = self.execute();
        let (outcome, failed_phase, server_output) = match result {
            Ok(()) => {
                info!("SUCCESS: bare deployment test completed");
                (Outcome::Success, None, None)
            }
            Err(e) => {
                error!(phase = %self.phase, "Test failed: {e}");
                (
                    Outcome::Failure(e.to_string()),
                    Some(self.phase),
                    read_output(&self.config.service_output()),
                )
            }
        };

        self.cleanup();
        self.enter(ScenarioPhase::Done);

        ScenarioReport {
            outcome,
            failed_phase,
            service_pids: std::mem::take(&mut self.service_pids),
            started_at,
            duration: clock.elapsed(),
            server_output,
        }
    }

    fn execute(&mut self) -> HarnessResult<()> {
        self.advance(ScenarioPhase::Preparing)?;
        let workdir = self.config.workdir();
        let data_dir = self.config.data_dir();
        workdir::recreate(&workdir)?;
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| HarnessError::io(format!("creating {}", data_dir.display()), e))?;
        let script = self.config.launch_script(&self.platform);
        let launch = self.platform.launch_command(&script);
        let output = self.config.service_output();

        self.advance(ScenarioPhase::Generating)?;
        self.build.generate_launch_script(&script, &data_dir)?;
        self.build.shutdown_default()?;

        self.advance(ScenarioPhase::FirstRun)?;
        let pid = self.service.start(&launch, &workdir, &output)?;
        self.service_pids.push(pid);
        self.build.clean()?;
        self.build.test()?;
        self.expect(Predicate::RemoteExecutionOccurred)?;

        // The cache must be persisted outside the process to survive this.
        self.advance(ScenarioPhase::Restarting)?;
        let pid = self.service.restart()?;
        self.service_pids.push(pid);

        self.advance(ScenarioPhase::SecondRun)?;
        self.build.clean()?;
        self.build.test()?;
        self.expect(Predicate::RemoteCacheHitOccurred)?;
        Ok(())
    }

    fn enter(&mut self, phase: ScenarioPhase) {
        info!(from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
    }

    /// Enter `phase` unless Ctrl+C arrived in the meantime.
    fn advance(&mut self, phase: ScenarioPhase) -> HarnessResult<()> {
        if interrupt::take() {
            return Err(HarnessError::Interrupted);
        }
        self.enter(phase);
        Ok(())
    }

    fn expect(&self, predicate: Predicate) -> HarnessResult<()> {
        let log = self.build.command_log();
        match log_check::find_evidence(&log, predicate)? {
            Some(evidence) => {
                info!(%predicate, line = %evidence.line, "Predicate satisfied");
                Ok(())
            }
            None => {
                if !log.exists() {
                    warn!(path = %log.display(), "Command log does not exist");
                }
                Err(HarnessError::Assertion(predicate.failure_message().to_string()))
            }
        }
    }

    /// Best-effort teardown. Every step runs; failures are only logged.
    fn cleanup(&mut self) {
        self.enter(ScenarioPhase::CleaningUp);

        if self.service.is_running() {
            if let Err(e) = self.service.stop() {
                error!("Failed to stop service: {e}");
            }
            // Only does anything if the stop left it alive.
            if let Err(e) = self.service.force_kill(self.config.kill_wait) {
                error!("Failed to kill service: {e}");
            }
        }

        if let Err(e) = self.build.shutdown() {
            error!("Failed to shut down build tool: {e}");
        }

        let workdir = self.config.workdir();
        if self.config.keep_workdir {
            info!(path = %workdir.display(), "Keeping working directory");
        } else if let Err(e) = workdir::force_remove(&workdir) {
            error!("Failed to remove working directory: {e}");
        }
    }
}

fn read_output(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}
