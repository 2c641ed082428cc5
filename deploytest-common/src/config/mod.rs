//! Configuration for the deployment test.
//!
//! Precedence, lowest first: built-in defaults, an optional TOML file,
//! `DEPLOYTEST_*` environment variables, then whatever the CLI overrides on
//! the returned value.

pub mod env;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub use env::{ENV_PREFIX, EnvError, EnvParser};

use crate::errors::{HarnessError, HarnessResult};
use crate::platform::Platform;

/// Time the service gets to begin listening after spawn.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(5);
/// Time a stopped service gets to exit cooperatively before it is force-killed.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(30);
/// Bound on the reap after a forced kill.
pub const DEFAULT_KILL_WAIT: Duration = Duration::from_secs(10);

pub const DEFAULT_WORKDIR_NAME: &str = "tmp-test-bare";
pub const DEFAULT_BUILD_TOOL: &str = "bazel";
pub const DEFAULT_DEPLOY_TARGET: &str = "//bare";
pub const DEFAULT_TEST_TARGET: &str = "@abseil-hello//:hello_test";

pub const OUTPUT_BASE_DIR: &str = "abseil_output_base";
pub const SERVICE_OUTPUT_FILE: &str = "bb-output.txt";
pub const DATA_DIR: &str = "bb-data";
pub const COMMAND_LOG_FILE: &str = "command.log";

/// Resolved harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Repository root; build commands run here.
    pub root: PathBuf,
    /// Scratch directory name, created under `root`.
    pub workdir_name: String,
    /// Build tool executable.
    pub build_tool: String,
    /// Target that emits the service launch script.
    pub deploy_target: String,
    /// Test target built in both cycles.
    pub test_target: String,
    /// Flags enabling remote execution.
    pub remote_configs: Vec<String>,
    pub warmup: Duration,
    pub grace_window: Duration,
    pub kill_wait: Duration,
    /// Leave the working directory behind for inspection.
    pub keep_workdir: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::for_platform(&Platform::current())
    }
}

/// On-disk TOML shape. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    root: Option<PathBuf>,
    workdir_name: Option<String>,
    build_tool: Option<String>,
    deploy_target: Option<String>,
    test_target: Option<String>,
    remote_configs: Option<Vec<String>>,
    warmup: Option<String>,
    grace_window: Option<String>,
    kill_wait: Option<String>,
    keep_workdir: Option<bool>,
}

impl HarnessConfig {
    /// Defaults for a given platform profile.
    pub fn for_platform(platform: &Platform) -> Self {
        Self {
            root: PathBuf::from("."),
            workdir_name: DEFAULT_WORKDIR_NAME.to_string(),
            build_tool: DEFAULT_BUILD_TOOL.to_string(),
            deploy_target: DEFAULT_DEPLOY_TARGET.to_string(),
            test_target: DEFAULT_TEST_TARGET.to_string(),
            remote_configs: platform.remote_configs(),
            warmup: DEFAULT_WARMUP,
            grace_window: DEFAULT_GRACE_WINDOW,
            kill_wait: DEFAULT_KILL_WAIT,
            keep_workdir: false,
        }
    }

    /// Load defaults, then the optional file, then the process environment.
    pub fn load(file: Option<&Path>) -> HarnessResult<Self> {
        Self::load_with(&Platform::current(), file, &mut EnvParser::new())
    }

    /// Same as [`HarnessConfig::load`] with an explicit platform and parser.
    pub fn load_with(
        platform: &Platform,
        file: Option<&Path>,
        parser: &mut EnvParser,
    ) -> HarnessResult<Self> {
        let mut config = Self::for_platform(platform);
        if let Some(path) = file {
            config.apply_file(path)?;
        }
        config.apply_env(parser)?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> HarnessResult<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::io(format!("reading {}", path.display()), e))?;
        let file: FileConfig =
            toml::from_str(&content).map_err(|e| HarnessError::ConfigFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let duration = |key: &str, value: Option<String>| -> HarnessResult<Option<Duration>> {
            value
                .map(|raw| {
                    env::parse_duration_string(&raw).ok_or_else(|| HarnessError::ConfigFile {
                        path: path.to_path_buf(),
                        reason: format!("invalid duration for {key}: '{raw}'"),
                    })
                })
                .transpose()
        };
        let warmup = duration("warmup", file.warmup)?;
        let grace_window = duration("grace_window", file.grace_window)?;
        let kill_wait = duration("kill_wait", file.kill_wait)?;

        // Relative roots in the file are relative to the file itself.
        if let Some(root) = file.root {
            self.root = match path.parent() {
                Some(dir) if root.is_relative() => dir.join(root),
                _ => root,
            };
        }
        set_if_some(&mut self.workdir_name, file.workdir_name);
        set_if_some(&mut self.build_tool, file.build_tool);
        set_if_some(&mut self.deploy_target, file.deploy_target);
        set_if_some(&mut self.test_target, file.test_target);
        set_if_some(&mut self.remote_configs, file.remote_configs);
        set_if_some(&mut self.warmup, warmup);
        set_if_some(&mut self.grace_window, grace_window);
        set_if_some(&mut self.kill_wait, kill_wait);
        set_if_some(&mut self.keep_workdir, file.keep_workdir);
        Ok(())
    }

    fn apply_env(&mut self, parser: &mut EnvParser) -> HarnessResult<()> {
        set_if_some(&mut self.root, parser.get_optional_path("ROOT"));
        set_if_some(&mut self.workdir_name, parser.get_optional_string("WORKDIR_NAME"));
        set_if_some(&mut self.build_tool, parser.get_optional_string("BUILD_TOOL"));
        set_if_some(&mut self.deploy_target, parser.get_optional_string("DEPLOY_TARGET"));
        set_if_some(&mut self.test_target, parser.get_optional_string("TEST_TARGET"));
        set_if_some(
            &mut self.remote_configs,
            parser.get_optional_string_list("REMOTE_CONFIGS"),
        );
        set_if_some(&mut self.warmup, parser.get_optional_duration("WARMUP"));
        set_if_some(&mut self.grace_window, parser.get_optional_duration("GRACE_WINDOW"));
        set_if_some(&mut self.kill_wait, parser.get_optional_duration("KILL_WAIT"));
        set_if_some(&mut self.keep_workdir, parser.get_optional_bool("KEEP_WORKDIR"));

        if parser.has_errors() {
            return Err(HarnessError::Config(parser.take_errors()));
        }
        Ok(())
    }

    /// Scratch directory recreated for every run.
    pub fn workdir(&self) -> PathBuf {
        self.root.join(&self.workdir_name)
    }

    /// Isolated build-tool state, including `command.log`.
    pub fn output_base(&self) -> PathBuf {
        self.workdir().join(OUTPUT_BASE_DIR)
    }

    /// Combined stdout/stderr of the service.
    pub fn service_output(&self) -> PathBuf {
        self.workdir().join(SERVICE_OUTPUT_FILE)
    }

    /// Data directory handed to the service.
    pub fn data_dir(&self) -> PathBuf {
        self.workdir().join(DATA_DIR)
    }

    /// Generated launch script for the given platform.
    pub fn launch_script(&self, platform: &Platform) -> PathBuf {
        self.workdir().join(platform.launch_script_name())
    }
}

fn set_if_some<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
