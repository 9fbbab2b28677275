//! Typed, validated configuration for both daemons (§4.A).
//!
//! Each YAML document is deserialized by `serde_yaml` into a typed tree with
//! `#[serde(deny_unknown_fields)]` on every record, then passed through an
//! explicit `validate()` step so that errors carry the offending key path.

pub mod client;
pub mod server;
pub mod service;

pub use client::{ClientConfig, Permissions, SftpdConfig};
pub use server::{ClientConnection, PushMode, ServerConfig};
pub use service::ServiceUpdate;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CertDeployError, Result};

/// Log verbosity, shared between the CertDeploy application log and the SFTP
/// transport log (§4.K). Mirrors Python `logging`'s named levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    #[default]
    Error,
    Critical,
}

impl LogLevel {
    /// The `tracing`/`EnvFilter` directive level this corresponds to.
    pub fn as_tracing_level(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = CertDeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(CertDeployError::config(format!(
                "log level must be one of DEBUG, INFO, WARNING, ERROR, CRITICAL, not: {other}"
            ))),
        }
    }
}

/// Parses the client's `update_delay` duration grammar: one or more
/// `<number><unit>` pairs concatenated together (e.g. `1w2d`, `90s`), where
/// `unit` is one of `s`, `m`, `h`, `d`, `w`.
///
/// `None` (YAML `null`) means zero delay. An empty or otherwise unparseable
/// string is a fatal `ConfigError` — the two cases are intentionally not
/// conflated (see DESIGN.md Open Questions).
pub fn parse_duration(raw: Option<&str>) -> Result<Duration> {
    let Some(raw) = raw else {
        return Ok(Duration::ZERO);
    };
    let re = duration_regex();
    let matches: Vec<_> = re.captures_iter(raw).collect();
    if matches.is_empty() {
        return Err(CertDeployError::config(format!(
            "update_delay {raw:?} is not a valid duration (expected e.g. \"1h\", \"1w2d\")"
        )));
    }
    // Reject any input with characters the regex didn't consume, so
    // "1hxyz" doesn't silently parse as "1h".
    let consumed: usize = matches.iter().map(|m| m.get(0).unwrap().len()).sum();
    if consumed != raw.chars().filter(|c| !c.is_whitespace()).count() {
        return Err(CertDeployError::config(format!(
            "update_delay {raw:?} is not a valid duration (expected e.g. \"1h\", \"1w2d\")"
        )));
    }
    let mut seconds = 0f64;
    for cap in matches {
        let amount: f64 = cap[1].parse().map_err(|_| {
            CertDeployError::config(format!("update_delay {raw:?} is not a valid duration"))
        })?;
        let unit = &cap[2];
        let factor = match unit {
            "w" => 60 * 60 * 24 * 7,
            "d" => 60 * 60 * 24,
            "h" => 60 * 60,
            "m" => 60,
            "s" => 1,
            _ => unreachable!("regex only matches [wdhms]"),
        };
        seconds += amount * factor as f64;
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn duration_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(\d+(?:\.\d+)?)([smhdw])").expect("static regex"))
}

/// Normalizes a file-permission mode to an integer in `[0, 0o777]`.
///
/// Accepts a YAML integer directly, or a string in `"0o777"`, `"0777"`, or
/// `"777"` form.
pub fn parse_mode(raw: &ModeValue) -> Result<u32> {
    let mode = match raw {
        ModeValue::Int(n) => *n,
        ModeValue::Str(s) => {
            let s = s.trim();
            let digits = s
                .strip_prefix("0o")
                .or_else(|| s.strip_prefix("0O"))
                .unwrap_or(s);
            u32::from_str_radix(digits, 8).map_err(|_| {
                CertDeployError::config(format!("{s:?} is not a valid octal file mode"))
            })?
        }
    };
    if mode > 0o777 {
        return Err(CertDeployError::config(format!(
            "file mode {mode:#o} is out of range 0..=0o777"
        )));
    }
    Ok(mode)
}

/// A file-permission mode as written in YAML: either a bare integer or a
/// quoted octal-looking string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModeValue {
    Int(u32),
    Str(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_null_is_zero() {
        assert_eq!(parse_duration(None).unwrap(), Duration::ZERO);
    }

    #[test]
    fn duration_empty_string_is_error() {
        assert!(parse_duration(Some("")).is_err());
    }

    #[test]
    fn duration_garbage_is_error() {
        assert!(parse_duration(Some("not-a-duration")).is_err());
        assert!(parse_duration(Some("1hxyz")).is_err());
    }

    #[test]
    fn duration_single_unit() {
        assert_eq!(parse_duration(Some("90s")).unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration(Some("1h")).unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn duration_compound() {
        assert_eq!(
            parse_duration(Some("1w2d")).unwrap(),
            Duration::from_secs(60 * 60 * 24 * 9)
        );
    }

    #[test]
    fn mode_from_int() {
        assert_eq!(parse_mode(&ModeValue::Int(0o600)).unwrap(), 0o600);
    }

    #[test]
    fn mode_from_strings() {
        assert_eq!(parse_mode(&ModeValue::Str("0o777".into())).unwrap(), 0o777);
        assert_eq!(parse_mode(&ModeValue::Str("0777".into())).unwrap(), 0o777);
        assert_eq!(parse_mode(&ModeValue::Str("777".into())).unwrap(), 0o777);
    }

    #[test]
    fn mode_out_of_range_is_error() {
        assert!(parse_mode(&ModeValue::Int(0o1000)).is_err());
    }
}
