//! Building blocks of the bare deployment end-to-end test.
//!
//! The scenario starts the remote-cache service, drives the build tool
//! through a cache-miss cycle, restarts the service and checks that the
//! second cycle is served from the cache.

pub mod build_tool;
pub mod config;
pub mod errors;
pub mod handle;
pub mod interrupt;
pub mod log_check;
pub mod logging;
pub mod platform;
pub mod probe;
pub mod relay;
pub mod runner;
pub mod scenario;
pub mod service;
pub mod terminate;
pub mod workdir;

pub use build_tool::{BazelCli, BuildTool};
pub use config::HarnessConfig;
pub use errors::{HarnessError, HarnessResult};
pub use handle::ProcessHandle;
pub use log_check::{LineClass, LogLine, Predicate, assert_contains, find_evidence};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use platform::{Platform, PlatformKind};
pub use runner::{CommandOutput, CommandSpec, run_command, run_command_captured};
pub use scenario::{Outcome, Scenario, ScenarioPhase, ScenarioReport};
pub use service::ServiceManager;
pub use terminate::{GracefulTerminator, StopTimeouts, platform_terminator};
