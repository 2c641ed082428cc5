use std::ffi::OsString;
use std::sync::Once;
use std::time::{Duration, Instant};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .json(),
            )
            .with(filter)
            .init();
    });
}

/// `sh -c <script>` as a service argv.
#[allow(dead_code)]
pub fn sh(script: &str) -> Vec<OsString> {
    vec!["sh".into(), "-c".into(), script.into()]
}

/// Whether a process with `pid` still exists (zombies included).
#[cfg(unix)]
#[allow(dead_code)]
pub fn pid_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// State letter from `/proc/<pid>/stat` and the process group it belongs to.
#[cfg(target_os = "linux")]
#[allow(dead_code)]
fn proc_stat(pid: &str) -> Option<(String, u32)> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.to_string();
    let pgrp = fields.nth(1)?.parse().ok()?;
    Some((state, pgrp))
}

/// Whether any non-zombie process is left in process group `pgid`.
#[cfg(unix)]
#[allow(dead_code)]
pub fn group_running(pgid: u32) -> bool {
    let target = nix::unistd::Pid::from_raw(pgid as i32);
    if nix::sys::signal::killpg(target, None) == Err(nix::errno::Errno::ESRCH) {
        return false;
    }
    #[cfg(target_os = "linux")]
    if let Ok(entries) = std::fs::read_dir("/proc") {
        return entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| proc_stat(&name))
            .any(|(state, pgrp)| pgrp == pgid && state != "Z" && state != "X");
    }
    true
}

/// Poll until `pid` is gone or `timeout` elapses.
#[cfg(unix)]
#[allow(dead_code)]
pub fn wait_until_dead(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while pid_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    true
}
