//! Per-service update specs (§3 "Service update spec", §4.C).
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CertDeployError, Result};

static DOCKER_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z0-9_.-]+$").expect("static regex"));

static SYSTEMD_UNIT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[a-z0-9:_,.\\-]+(@[a-z0-9:_,.\\-]+)?\.(service|socket|device|mount|automount|swap|target|path|timer|slice|scope)$",
    )
    .expect("static regex")
});

const RC_ACTIONS: [&str; 2] = ["restart", "reload"];
const SYSTEMD_ACTIONS: [&str; 2] = ["restart", "reload"];

/// The tagged union of service-update actions a client may run after
/// promoting new certificates.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceUpdate {
    /// Restart running containers matched by filters (and/or an exact name).
    DockerContainer {
        name: Option<String>,
        filters: HashMap<String, Vec<String>>,
        timeout: Option<Duration>,
    },
    /// Force-update an orchestrator (Swarm) service matched by name or filters.
    DockerService {
        name: Option<String>,
        filters: HashMap<String, Vec<String>>,
        timeout: Option<Duration>,
    },
    /// Run an OpenRC/SysV-style `rc-service <name> <action>` (or
    /// `<name> <action>`, per the configured executable's argument order).
    RcService {
        name: String,
        action: String,
        timeout: Option<Duration>,
    },
    /// Run `systemctl <action> <name>`.
    SystemdUnit {
        name: String,
        action: String,
        timeout: Option<Duration>,
    },
    /// Run an arbitrary script with no arguments.
    Script {
        /// The script path as resolved to an absolute, existing executable.
        script_path: std::path::PathBuf,
        timeout: Option<Duration>,
    },
}

impl ServiceUpdate {
    /// Human-readable name used in error messages and logs.
    pub fn describe(&self) -> String {
        match self {
            ServiceUpdate::DockerContainer { name, filters, .. } => {
                format!("docker_container(name={name:?}, filters={filters:?})")
            }
            ServiceUpdate::DockerService { name, filters, .. } => {
                format!("docker_service(name={name:?}, filters={filters:?})")
            }
            ServiceUpdate::RcService { name, action, .. } => format!("rc({name} {action})"),
            ServiceUpdate::SystemdUnit { name, action, .. } => {
                format!("systemd({name} {action})")
            }
            ServiceUpdate::Script { script_path, .. } => {
                format!("script({})", script_path.display())
            }
        }
    }
}

/// The raw, untyped form as read from YAML (`update_services[]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawServiceUpdate {
    #[serde(rename = "type")]
    pub type_: String,
    pub name: Option<String>,
    #[serde(default)]
    pub filters: Option<HashMap<String, Vec<String>>>,
    pub action: Option<String>,
    /// Seconds. Absent means "use the client-wide default for this variant".
    pub timeout: Option<f64>,
}

fn resolve_timeout(raw: Option<f64>, default_secs: Option<f64>) -> Result<Option<Duration>> {
    let value = raw.or(default_secs);
    match value {
        None => Ok(None),
        Some(secs) if secs < 0.0 => Err(CertDeployError::config(format!(
            "timeout must be >= 0, got {secs}"
        ))),
        Some(secs) => Ok(Some(Duration::from_secs_f64(secs))),
    }
}

/// Default timeouts (seconds), taken from the owning `ClientConfig`, to use
/// when a service spec doesn't set its own `timeout`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTimeouts {
    pub docker: Option<f64>,
    pub init: Option<f64>,
    pub script: Option<f64>,
}

impl RawServiceUpdate {
    pub fn into_service_update(self, defaults: DefaultTimeouts) -> Result<ServiceUpdate> {
        match self.type_.as_str() {
            "docker_container" => {
                let name = validate_docker_name(self.name)?;
                let mut filters = self.filters.unwrap_or_default();
                if let Some(name) = &name {
                    if filters.is_empty() {
                        filters.insert("name".to_string(), vec![format!("^{name}$")]);
                    }
                }
                if name.is_none() && filters.is_empty() {
                    return Err(CertDeployError::config(
                        "either `filters` or `name` must be given in a docker_container config",
                    ));
                }
                Ok(ServiceUpdate::DockerContainer {
                    name,
                    filters,
                    timeout: resolve_timeout(self.timeout, defaults.docker)?,
                })
            }
            "docker_service" => {
                let name = validate_docker_name(self.name)?;
                let filters = self.filters.unwrap_or_default();
                if name.is_none() && filters.is_empty() {
                    return Err(CertDeployError::config(
                        "either `filters` or `name` must be given in a docker_service config",
                    ));
                }
                Ok(ServiceUpdate::DockerService {
                    name,
                    filters,
                    timeout: resolve_timeout(self.timeout, defaults.docker)?,
                })
            }
            "rc" => {
                let name = self
                    .name
                    .filter(|n| !n.trim().is_empty())
                    .ok_or_else(|| CertDeployError::config("rc service config needs a `name`"))?
                    .trim()
                    .to_string();
                let action = validate_action(self.action, &RC_ACTIONS, "restart")?;
                Ok(ServiceUpdate::RcService {
                    name,
                    action,
                    timeout: resolve_timeout(self.timeout, defaults.init)?,
                })
            }
            "systemd" => {
                let name = self
                    .name
                    .ok_or_else(|| CertDeployError::config("systemd config needs a `name`"))?;
                let name = name.trim().to_string();
                if !SYSTEMD_UNIT_NAME_RE.is_match(&name) {
                    return Err(CertDeployError::config(format!(
                        "{name:?} is not a valid systemd unit name"
                    )));
                }
                let action = validate_action(self.action, &SYSTEMD_ACTIONS, "restart")?;
                Ok(ServiceUpdate::SystemdUnit {
                    name,
                    action,
                    timeout: resolve_timeout(self.timeout, defaults.init)?,
                })
            }
            "script" => {
                let name = self
                    .name
                    .filter(|n| !n.trim().is_empty())
                    .ok_or_else(|| CertDeployError::config("script config needs a `name`"))?;
                let script_path = resolve_script_path(&name)?;
                Ok(ServiceUpdate::Script {
                    script_path,
                    timeout: resolve_timeout(self.timeout, defaults.script)?,
                })
            }
            other => Err(CertDeployError::config(format!(
                "{other} is not a valid service update type"
            ))),
        }
    }
}

fn validate_docker_name(name: Option<String>) -> Result<Option<String>> {
    match name {
        None => Ok(None),
        Some(name) => {
            let trimmed = name.trim();
            if trimmed.is_empty() || !DOCKER_NAME_RE.is_match(trimmed) {
                return Err(CertDeployError::config(format!(
                    "{name:?} is not a valid docker container/service name"
                )));
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

fn validate_action(action: Option<String>, allowed: &[&str], default: &str) -> Result<String> {
    match action {
        None => Ok(default.to_string()),
        Some(action) => {
            let normalized = action.trim().to_ascii_lowercase();
            if allowed.contains(&normalized.as_str()) {
                Ok(normalized)
            } else {
                Err(CertDeployError::config(format!(
                    "action must be one of {allowed:?}, not: {action}"
                )))
            }
        }
    }
}

/// Resolves a script `name` to an absolute, existing executable path:
/// absolute path as-is, then a `PATH` lookup, then CWD-relative.
fn resolve_script_path(name: &str) -> Result<std::path::PathBuf> {
    let as_path = std::path::Path::new(name);
    let candidate = if as_path.is_absolute() {
        as_path.to_path_buf()
    } else if let Some(found) = which(name) {
        found
    } else {
        std::env::current_dir()
            .map_err(CertDeployError::Io)?
            .join(as_path)
    };
    if !candidate.exists() {
        return Err(CertDeployError::config(format!(
            "script {:?} for service {name:?} not found",
            candidate.display()
        )));
    }
    Ok(candidate)
}

/// Minimal `PATH` lookup, equivalent to `shutil.which` for our purposes.
fn which(name: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(type_: &str) -> RawServiceUpdate {
        RawServiceUpdate {
            type_: type_.to_string(),
            name: None,
            filters: None,
            action: None,
            timeout: None,
        }
    }

    #[test]
    fn systemd_rejects_bad_name() {
        let mut r = raw("systemd");
        r.name = Some("bad name.service".to_string());
        let err = r.into_service_update(DefaultTimeouts::default()).unwrap_err();
        assert!(matches!(err, CertDeployError::Config(_)));
    }

    #[test]
    fn systemd_accepts_good_name() {
        let mut r = raw("systemd");
        r.name = Some("nginx.service".to_string());
        let update = r.into_service_update(DefaultTimeouts::default()).unwrap();
        assert!(matches!(update, ServiceUpdate::SystemdUnit { action, .. } if action == "restart"));
    }

    #[test]
    fn systemd_rejects_bad_action() {
        let mut r = raw("systemd");
        r.name = Some("nginx.service".to_string());
        r.action = Some("frobnicate".to_string());
        assert!(r.into_service_update(DefaultTimeouts::default()).is_err());
    }

    #[test]
    fn docker_container_defaults_filter_from_name() {
        let mut r = raw("docker_container");
        r.name = Some("web".to_string());
        let update = r.into_service_update(DefaultTimeouts::default()).unwrap();
        match update {
            ServiceUpdate::DockerContainer { filters, .. } => {
                assert_eq!(filters.get("name").unwrap(), &vec!["^web$".to_string()]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn docker_service_requires_name_or_filters() {
        let r = raw("docker_service");
        assert!(r.into_service_update(DefaultTimeouts::default()).is_err());
    }

    #[test]
    fn script_requires_existing_executable() {
        let mut r = raw("script");
        r.name = Some("/definitely/not/a/real/path-xyz".to_string());
        assert!(r.into_service_update(DefaultTimeouts::default()).is_err());
    }

    #[test]
    fn unknown_type_is_error() {
        let r = raw("not-a-type");
        assert!(r.into_service_update(DefaultTimeouts::default()).is_err());
    }
}
