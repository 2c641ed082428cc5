//! Environment variable parsing with type safety.
//!
//! Provides a typed parser for `DEPLOYTEST_*` variables that collects every
//! problem instead of stopping at the first one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Prefix shared by every harness environment variable.
pub const ENV_PREFIX: &str = "DEPLOYTEST_";

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Invalid duration format.
    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

type Lookup = Box<dyn Fn(&str) -> Option<String>>;

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    lookup: Lookup,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a parser reading the process environment.
    pub fn new() -> Self {
        Self {
            prefix: ENV_PREFIX,
            lookup: Box::new(|name| std::env::var(name).ok()),
            errors: Vec::new(),
        }
    }

    /// Create a parser over a fixed set of variables (full names, prefix included).
    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self {
            prefix: ENV_PREFIX,
            lookup: Box::new(move |name| vars.get(name).cloned()),
            errors: Vec::new(),
        }
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> (String, Option<String>) {
        let var_name = self.var_name(name);
        let value = (self.lookup)(&var_name);
        (var_name, value)
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Option<String> {
        match self.raw(name) {
            (_, Some(value)) if !value.trim().is_empty() => Some(value),
            _ => None,
        }
    }

    /// Get an optional path (None if not set or empty).
    pub fn get_optional_path(&mut self, name: &str) -> Option<PathBuf> {
        self.get_optional_string(name).map(PathBuf::from)
    }

    /// Get an optional boolean.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_optional_bool(&mut self, name: &str) -> Option<bool> {
        let (var_name, value) = self.raw(name);
        let value = value?;
        match parse_bool_string(&value) {
            Some(parsed) => Some(parsed),
            None => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get an optional duration in humantime notation (`5s`, `1m 30s`, `250ms`).
    ///
    /// A bare integer is read as seconds.
    pub fn get_optional_duration(&mut self, name: &str) -> Option<Duration> {
        let (var_name, value) = self.raw(name);
        let value = value?;
        match parse_duration_string(&value) {
            Some(duration) => Some(duration),
            None => {
                self.errors.push(EnvError::InvalidDuration {
                    var: var_name,
                    value,
                });
                None
            }
        }
    }

    /// Get a comma-separated list of strings (None if not set).
    pub fn get_optional_string_list(&mut self, name: &str) -> Option<Vec<String>> {
        let (_, value) = self.raw(name);
        value.map(|value| parse_string_list(&value))
    }

    /// Get a log level value with validation.
    pub fn get_optional_log_level(&mut self, name: &str) -> Option<String> {
        let (var_name, value) = self.raw(name);
        let value = value?;
        match parse_log_level_string(&value) {
            Some(level) => Some(level),
            None => {
                self.errors.push(EnvError::InvalidLogLevel {
                    var: var_name,
                    value,
                });
                None
            }
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn parse_bool_string(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_duration_string(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(trimmed).ok()
}

pub(crate) fn parse_log_level_string(value: &str) -> Option<String> {
    let lower = value.trim().to_lowercase();
    match lower.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => Some(lower),
        _ => None,
    }
}

pub(crate) fn parse_string_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
