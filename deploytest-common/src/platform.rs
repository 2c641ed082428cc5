//! Host platform profile.
//!
//! Resolved once at startup so the rest of the harness never checks
//! `cfg!(windows)` itself.

use std::ffi::OsString;
use std::path::Path;

/// Name of the environment variable the build configuration keys off.
pub const OS_ENV_VAR: &str = "OS";

/// Which family of launch script and termination mechanism the host uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Windows,
    Posix,
}

/// Platform-specific parameters of the deployment test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub kind: PlatformKind,
    /// Label exported to build invocations as `OS=<label>`.
    pub os_label: String,
}

impl Platform {
    /// Profile of the platform this binary was compiled for.
    pub fn current() -> Self {
        let kind = if cfg!(windows) {
            PlatformKind::Windows
        } else {
            PlatformKind::Posix
        };
        Self {
            kind,
            os_label: os_label(std::env::consts::OS),
        }
    }

    /// File name of the generated launch script.
    pub fn launch_script_name(&self) -> &'static str {
        match self.kind {
            PlatformKind::Windows => "run_bare.cmd",
            PlatformKind::Posix => "run_bare.sh",
        }
    }

    /// Argument vector that runs the launch script.
    pub fn launch_command(&self, script: &Path) -> Vec<OsString> {
        match self.kind {
            PlatformKind::Windows => vec![
                OsString::from("cmd.exe"),
                OsString::from("/c"),
                script.as_os_str().to_owned(),
            ],
            PlatformKind::Posix => vec![script.as_os_str().to_owned()],
        }
    }

    /// Build flags selecting the remote-execution configuration.
    pub fn remote_configs(&self) -> Vec<String> {
        let mut configs = vec!["--config=remote-local".to_string()];
        if self.kind == PlatformKind::Windows {
            configs.push("--config=remote-exec-windows".to_string());
        }
        configs
    }
}

/// Map `std::env::consts::OS` to the name `uname`/`platform.system()` reports.
fn os_label(os: &str) -> String {
    match os {
        "windows" => "Windows".to_string(),
        "linux" => "Linux".to_string(),
        "macos" => "Darwin".to_string(),
        "freebsd" => "FreeBSD".to_string(),
        "netbsd" => "NetBSD".to_string(),
        "openbsd" => "OpenBSD".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}
