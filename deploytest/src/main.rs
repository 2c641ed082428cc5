//! Bare deployment end-to-end test.
//!
//! Starts the remote-cache service, checks that a first build executes
//! remotely, restarts the service and checks that a second build is served
//! from the remote cache. Exits 0 on success and 1 on any failure.

#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deploytest_common::probe::{ProbeConfig, run_probe};
use deploytest_common::{
    BazelCli, CommandSpec, HarnessConfig, LogConfig, Platform, Scenario, init_logging, interrupt,
    platform_terminator, relay,
};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "deploytest")]
#[command(author, version, about = "End-to-end test of the bare remote-cache deployment")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML file with harness settings
    #[arg(long, global = true, env = "DEPLOYTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Repository root the build tool runs in
    #[arg(long)]
    root: Option<PathBuf>,

    /// Leave the working directory behind after the run
    #[arg(long)]
    keep_workdir: bool,

    /// Time the service gets to start listening (e.g. "5s")
    #[arg(long, value_parser = humantime::parse_duration)]
    warmup: Option<Duration>,

    /// Time a stopped service gets to exit before it is force-killed
    #[arg(long, value_parser = humantime::parse_duration)]
    grace_window: Option<Duration>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the deployment scenario (default)
    Run,

    /// Check that the platform stop request interrupts a long-running task
    ProbeInterrupt {
        /// Delay between spawning the task and stopping it
        #[arg(long, value_parser = humantime::parse_duration)]
        settle: Option<Duration>,
    },

    /// Run a command in its own process group and relay its output
    Relay {
        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<OsString>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let logging_guards = init_logging(&log_config)?;

    let code = run(cli)?;
    // process::exit skips destructors; flush the log file first.
    drop(logging_guards);
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let platform = Platform::current();
    debug!(os = %platform.os_label, kind = ?platform.kind, "Resolved platform");

    match cli.command {
        None | Some(Commands::Run) => {
            let mut config = HarnessConfig::load(cli.config.as_deref())
                .context("Failed to load configuration")?;
            if let Some(root) = cli.root {
                config.root = root;
            }
            if cli.keep_workdir {
                config.keep_workdir = true;
            }
            if let Some(warmup) = cli.warmup {
                config.warmup = warmup;
            }
            if let Some(grace) = cli.grace_window {
                config.grace_window = grace;
            }
            debug!(?config, "Loaded configuration");

            interrupt::install_handler();
            let build = BazelCli::new(&config, &platform);
            let report = Scenario::new(config, platform, build, platform_terminator()).run();
            report.print_diagnostics();
            info!(
                exit_code = report.exit_code(),
                duration = ?report.duration,
                services = ?report.service_pids,
                "Scenario finished"
            );
            Ok(report.exit_code())
        }
        Some(Commands::ProbeInterrupt { settle }) => {
            let mut config = ProbeConfig::for_platform(&platform);
            if let Some(settle) = settle {
                config.settle = settle;
            }
            if let Some(grace) = cli.grace_window {
                config.timeouts.grace = grace;
            }

            interrupt::install_handler();
            let outcome = run_probe(platform_terminator().as_ref(), &config)?;
            if outcome.is_success() {
                println!("SUCCESS: Process terminated successfully");
                Ok(0)
            } else {
                eprintln!("ERROR: {outcome:?}");
                Ok(1)
            }
        }
        Some(Commands::Relay { command }) => {
            let spec = CommandSpec::from_argv(&command).context("No command given")?;
            Ok(relay::relay(&spec, platform_terminator().as_ref())?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_scenario() {
        let cli = Cli::try_parse_from(["deploytest"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.keep_workdir);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "deploytest",
            "--root",
            "/repo",
            "--warmup",
            "2s",
            "--grace-window",
            "1m",
            "--keep-workdir",
            "run",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/repo")));
        assert_eq!(cli.warmup, Some(Duration::from_secs(2)));
        assert_eq!(cli.grace_window, Some(Duration::from_secs(60)));
        assert!(cli.keep_workdir);
        assert!(matches!(cli.command, Some(Commands::Run)));
    }

    #[test]
    fn test_relay_keeps_trailing_args() {
        let cli = Cli::try_parse_from(["deploytest", "relay", "--", "bash", "-c", "echo hi"])
            .unwrap();
        match cli.command {
            Some(Commands::Relay { command }) => {
                assert_eq!(command, vec!["bash", "-c", "echo hi"]);
            }
            _ => panic!("expected relay"),
        }
    }

    #[test]
    fn test_relay_requires_a_command() {
        assert!(Cli::try_parse_from(["deploytest", "relay"]).is_err());
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        assert!(Cli::try_parse_from(["deploytest", "--warmup", "soonish"]).is_err());
    }
}
