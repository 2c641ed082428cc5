//! The build tool as seen by the scenario: a handful of fixed invocations.

use std::path::{Path, PathBuf};

use crate::config::{COMMAND_LOG_FILE, HarnessConfig};
use crate::errors::HarnessResult;
use crate::platform::{OS_ENV_VAR, Platform};
use crate::runner::{CommandSpec, run_command};

/// Operations the scenario needs from the build tool.
pub trait BuildTool {
    /// Write a self-contained launch script for the deployment to `script`,
    /// with the service's data directory baked in.
    fn generate_launch_script(&self, script: &Path, data_dir: &Path) -> HarnessResult<()>;

    /// Shut down the background server of the default output base.
    fn shutdown_default(&self) -> HarnessResult<()>;

    /// Drop cached build results in the isolated output base.
    fn clean(&self) -> HarnessResult<()>;

    /// Build and run the test target with remote execution enabled and the
    /// disk cache disabled.
    fn test(&self) -> HarnessResult<()>;

    /// Shut down the background server of the isolated output base.
    fn shutdown(&self) -> HarnessResult<()>;

    /// Log written by the most recent invocation.
    fn command_log(&self) -> PathBuf;
}

/// Drives the `bazel` command line.
#[derive(Debug, Clone)]
pub struct BazelCli {
    program: String,
    root: PathBuf,
    output_base: PathBuf,
    deploy_target: String,
    test_target: String,
    remote_configs: Vec<String>,
    os_label: String,
}

impl BazelCli {
    pub fn new(config: &HarnessConfig, platform: &Platform) -> Self {
        Self {
            program: config.build_tool.clone(),
            root: config.root.clone(),
            output_base: config.output_base(),
            deploy_target: config.deploy_target.clone(),
            test_target: config.test_target.clone(),
            remote_configs: config.remote_configs.clone(),
            os_label: platform.os_label.clone(),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.program)
            .current_dir(&self.root)
            .env(OS_ENV_VAR, &self.os_label)
    }

    fn isolated(&self) -> CommandSpec {
        self.command()
            .arg(format!("--output_base={}", self.output_base.display()))
    }

    pub fn generate_command(&self, script: &Path, data_dir: &Path) -> CommandSpec {
        self.command()
            .arg("run")
            .arg(format!("--script_path={}", script.display()))
            .arg("--")
            .arg(&self.deploy_target)
            .arg(data_dir)
    }

    pub fn shutdown_default_command(&self) -> CommandSpec {
        self.command().arg("shutdown")
    }

    pub fn clean_command(&self) -> CommandSpec {
        self.isolated().args(["--nohome_rc", "clean"])
    }

    pub fn test_command(&self) -> CommandSpec {
        self.isolated()
            .args([
                "--nohome_rc",
                "test",
                "--color=no",
                "--curses=no",
                "--disk_cache=",
            ])
            .args(&self.remote_configs)
            .arg(&self.test_target)
    }

    pub fn shutdown_command(&self) -> CommandSpec {
        self.isolated().arg("shutdown")
    }
}

impl BuildTool for BazelCli {
    fn generate_launch_script(&self, script: &Path, data_dir: &Path) -> HarnessResult<()> {
        run_command(&self.generate_command(script, data_dir), true).map(drop)
    }

    fn shutdown_default(&self) -> HarnessResult<()> {
        run_command(&self.shutdown_default_command(), true).map(drop)
    }

    fn clean(&self) -> HarnessResult<()> {
        run_command(&self.clean_command(), true).map(drop)
    }

    fn test(&self) -> HarnessResult<()> {
        run_command(&self.test_command(), true).map(drop)
    }

    fn shutdown(&self) -> HarnessResult<()> {
        run_command(&self.shutdown_command(), true).map(drop)
    }

    fn command_log(&self) -> PathBuf {
        self.output_base.join(COMMAND_LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformKind;

    fn bazel(kind: PlatformKind, label: &str) -> BazelCli {
        let platform = Platform {
            kind,
            os_label: label.to_string(),
        };
        let mut config = HarnessConfig::for_platform(&platform);
        config.root = PathBuf::from("/repo");
        BazelCli::new(&config, &platform)
    }

    fn args(spec: &CommandSpec) -> Vec<String> {
        spec.get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_generate_command() {
        let cli = bazel(PlatformKind::Posix, "Linux");
        let spec = cli.generate_command(
            Path::new("/repo/tmp-test-bare/run_bare.sh"),
            Path::new("/repo/tmp-test-bare/bb-data"),
        );
        assert_eq!(spec.program(), "bazel");
        assert_eq!(spec.get_current_dir(), Some(Path::new("/repo")));
        assert_eq!(
            args(&spec),
            vec![
                "run",
                "--script_path=/repo/tmp-test-bare/run_bare.sh",
                "--",
                "//bare",
                "/repo/tmp-test-bare/bb-data",
            ]
        );
    }

    #[test]
    fn test_isolated_commands_use_output_base() {
        let cli = bazel(PlatformKind::Posix, "Linux");
        let base = "--output_base=/repo/tmp-test-bare/abseil_output_base";
        assert_eq!(args(&cli.clean_command()), vec![base, "--nohome_rc", "clean"]);
        assert_eq!(args(&cli.shutdown_command()), vec![base, "shutdown"]);
        assert_eq!(args(&cli.shutdown_default_command()), vec!["shutdown"]);
        assert_eq!(
            cli.command_log(),
            PathBuf::from("/repo/tmp-test-bare/abseil_output_base/command.log")
        );
    }

    #[test]
    fn test_test_command_per_platform() {
        let linux = bazel(PlatformKind::Posix, "Linux");
        assert_eq!(
            linux.test_command().display(),
            "bazel --output_base=/repo/tmp-test-bare/abseil_output_base --nohome_rc test \
             --color=no --curses=no --disk_cache= --config=remote-local @abseil-hello//:hello_test"
        );

        let windows = bazel(PlatformKind::Windows, "Windows");
        let args = args(&windows.test_command());
        assert!(args.contains(&"--config=remote-exec-windows".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("@abseil-hello//:hello_test"));
    }

    #[cfg(unix)]
    #[test]
    fn test_os_label_reaches_child_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let platform = Platform {
            kind: PlatformKind::Posix,
            os_label: "Plan9".to_string(),
        };
        let mut config = HarnessConfig::for_platform(&platform);
        config.root = tmp.path().to_path_buf();
        config.build_tool = "sh".to_string();
        let cli = BazelCli::new(&config, &platform);

        let spec = cli.command().args(["-c", "test \"$OS\" = Plan9"]);
        assert!(run_command(&spec, true).is_ok());
    }
}
