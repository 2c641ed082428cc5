//! Cache-behaviour checks over the build tool's `command.log`.
//!
//! The build tool ends every invocation with a process summary such as
//!
//! ```text
//! INFO: 3 processes: 2 remote cache hit, 1 internal.
//! ```
//!
//! Each line is tokenised into a [`LogLine`] and classified. A predicate is
//! satisfied by the first line whose class matches; later lines are never
//! read.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use tracing::{debug, info};

use crate::errors::{HarnessError, HarnessResult};

/// Marker of informational lines.
pub const INFO_MARKER: &str = "INFO";

/// How a group of processes in a summary was executed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionKind {
    Remote,
    RemoteCacheHit,
    DiskCacheHit,
    Internal,
    Local,
    Sandbox,
    Worker,
    Other(String),
}

impl ExecutionKind {
    fn parse(raw: &str) -> Self {
        match raw {
            "remote" => Self::Remote,
            "remote cache hit" => Self::RemoteCacheHit,
            "disk cache hit" => Self::DiskCacheHit,
            "internal" => Self::Internal,
            "local" => Self::Local,
            "worker" => Self::Worker,
            s if s.ends_with("sandbox") => Self::Sandbox,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A parsed process-summary line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub marker: String,
    /// Total the line declares, which may differ from the sum of entries.
    pub total: u64,
    pub entries: Vec<(u64, ExecutionKind)>,
}

impl LogLine {
    /// Parse `MARKER: N process(es): c1 kind1, c2 kind2.`
    ///
    /// Returns `None` for anything that is not a process summary.
    pub fn parse(line: &str) -> Option<Self> {
        let (marker, rest) = line.trim_end().split_once(':')?;
        if marker.is_empty() || !marker.bytes().all(|b| b.is_ascii_uppercase()) {
            return None;
        }

        let (head, tail) = rest.trim_start().split_once(':')?;
        let (total, noun) = head.split_once(' ')?;
        if noun != "process" && noun != "processes" {
            return None;
        }
        let total = total.parse().ok()?;

        let body = tail.trim().trim_end_matches('.');
        let entries = body
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (count, kind) = entry.split_once(' ')?;
                Some((count.parse().ok()?, ExecutionKind::parse(kind.trim())))
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            marker: marker.to_string(),
            total,
            entries,
        })
    }

    pub fn has(&self, kind: &ExecutionKind) -> bool {
        self.entries.iter().any(|(_, k)| k == kind)
    }

    pub fn classify(&self) -> LineClass {
        if self.marker != INFO_MARKER {
            return LineClass::Neutral;
        }
        match (
            self.has(&ExecutionKind::Remote),
            self.has(&ExecutionKind::RemoteCacheHit),
        ) {
            (true, false) => LineClass::RemoteExecutionEvidence,
            (false, true) => LineClass::RemoteCacheHitEvidence,
            _ => LineClass::Neutral,
        }
    }
}

/// What a single log line proves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    RemoteExecutionEvidence,
    RemoteCacheHitEvidence,
    Neutral,
}

/// Classify a raw log line.
pub fn classify(line: &str) -> LineClass {
    LogLine::parse(line).map_or(LineClass::Neutral, |parsed| parsed.classify())
}

/// The two cache-behaviour claims a build cycle can be checked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Some actions ran remotely and none came from the remote cache.
    RemoteExecutionOccurred,
    /// Some actions came from the remote cache and none ran remotely.
    RemoteCacheHitOccurred,
}

impl Predicate {
    fn evidence_class(self) -> LineClass {
        match self {
            Self::RemoteExecutionOccurred => LineClass::RemoteExecutionEvidence,
            Self::RemoteCacheHitOccurred => LineClass::RemoteCacheHitEvidence,
        }
    }

    pub fn matches(self, line: &str) -> bool {
        classify(line) == self.evidence_class()
    }

    /// Assertion message used when the evidence is missing.
    pub fn failure_message(self) -> &'static str {
        match self {
            Self::RemoteExecutionOccurred => "expected remote executions but found none",
            Self::RemoteCacheHitOccurred => "expected remote cache hits but found none",
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteExecutionOccurred => write!(f, "RemoteExecutionOccurred"),
            Self::RemoteCacheHitOccurred => write!(f, "RemoteCacheHitOccurred"),
        }
    }
}

/// The first line that satisfied a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    /// 1-based.
    pub line_number: usize,
    pub line: String,
}

/// First line of `content` satisfying `predicate`.
pub fn scan(content: &str, predicate: Predicate) -> Option<Evidence> {
    content
        .lines()
        .enumerate()
        .find(|(_, line)| predicate.matches(line))
        .map(|(idx, line)| Evidence {
            line_number: idx + 1,
            line: line.trim_end().to_string(),
        })
}

/// First line of the log at `path` satisfying `predicate`.
///
/// A missing file is `Ok(None)`: the caller decides whether that is fatal.
pub fn find_evidence(path: &Path, predicate: Predicate) -> HarnessResult<Option<Evidence>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Log file does not exist");
            return Ok(None);
        }
        Err(e) => return Err(HarnessError::io(format!("opening {}", path.display()), e)),
    };

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_number = 0;
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| HarnessError::io(format!("reading {}", path.display()), e))?;
        if read == 0 {
            return Ok(None);
        }
        line_number += 1;
        let line = String::from_utf8_lossy(&buf);
        if predicate.matches(&line) {
            let evidence = Evidence {
                line_number,
                line: line.trim_end().to_string(),
            };
            info!(%predicate, line_number, line = %evidence.line, "Found log evidence");
            return Ok(Some(evidence));
        }
    }
}

/// Whether the log at `path` satisfies `predicate`.
pub fn assert_contains(path: &Path, predicate: Predicate) -> HarnessResult<bool> {
    Ok(find_evidence(path, predicate)?.is_some())
}
