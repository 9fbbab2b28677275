//! Server-side configuration: `ServerConfig` and its `clients[]` (§4.A, §5).
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use ssh_key::PublicKey;

use super::{parse_duration, LogLevel};
use crate::error::{CertDeployError, Result};

const WEEKDAYS: [&str; 7] = [
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];
const INTERVAL_UNITS: [&str; 4] = ["minute", "hour", "day", "week"];

const DEFAULT_QUEUE_DIR: &str = "/var/run/certdeploy/queue";
const DEFAULT_CLIENT_SOURCE_DIR: &str = "/certdeploy/new-certs";
const DEFAULT_USERNAME: &str = "certdeploy";
const DEFAULT_PORT: u16 = 22;

/// How the server fans pushes out to clients once new certs are queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PushMode {
    #[default]
    Serial,
    Parallel,
}

/// Raw `server.yml` document, deserialized before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServerConfig {
    privkey_filename: PathBuf,
    #[serde(default)]
    client_configs: Vec<RawClientConnection>,
    #[serde(default)]
    fail_fast: bool,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    log_filename: Option<PathBuf>,
    #[serde(default)]
    sftp_log_level: Option<String>,
    #[serde(default)]
    sftp_log_filename: Option<PathBuf>,
    #[serde(default = "default_renew_every")]
    renew_every: i64,
    #[serde(default = "default_renew_unit")]
    renew_unit: String,
    #[serde(default)]
    renew_at: Option<String>,
    #[serde(default)]
    renew_exec: Option<String>,
    #[serde(default = "default_renew_args")]
    renew_args: Vec<String>,
    #[serde(default)]
    renew_timeout: Option<f64>,
    #[serde(default)]
    push_mode: PushMode,
    #[serde(default)]
    push_interval: i64,
    #[serde(default = "default_push_retries")]
    push_retries: i64,
    #[serde(default = "default_push_retry_interval")]
    push_retry_interval: i64,
    #[serde(default)]
    join_timeout: Option<f64>,
    #[serde(default = "default_queue_dir")]
    queue_dir: PathBuf,
}

fn default_renew_every() -> i64 {
    1
}
fn default_renew_unit() -> String {
    "day".to_string()
}
fn default_renew_args() -> Vec<String> {
    vec!["renew".to_string()]
}
fn default_push_retries() -> i64 {
    1
}
fn default_push_retry_interval() -> i64 {
    30
}
fn default_queue_dir() -> PathBuf {
    PathBuf::from(DEFAULT_QUEUE_DIR)
}

/// Validated server configuration (mirrors Python's `Server` + `ServerConfig`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub privkey_filename: PathBuf,
    pub fail_fast: bool,
    pub log_level: LogLevel,
    pub log_filename: Option<PathBuf>,
    pub sftp_log_level: LogLevel,
    pub sftp_log_filename: Option<PathBuf>,
    pub renew_every: i64,
    /// Normalized, pluralized where `renew_every != 1` (e.g. `"days"`).
    pub renew_unit: String,
    pub renew_at: Option<String>,
    pub renew_exec: String,
    pub renew_args: Vec<String>,
    pub renew_timeout: Option<Duration>,
    pub push_mode: PushMode,
    pub push_interval: Duration,
    pub push_retries: u32,
    pub push_retry_interval: Duration,
    pub join_timeout: Option<Duration>,
    pub queue_dir: PathBuf,
    pub clients: Vec<ClientConnection>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawServerConfig = serde_yaml::from_str(&text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawServerConfig) -> Result<Self> {
        if !raw.privkey_filename.is_file() {
            return Err(CertDeployError::config(format!(
                "privkey_filename {:?} is not a file",
                raw.privkey_filename
            )));
        }
        if !raw.queue_dir.is_dir() {
            return Err(CertDeployError::config(format!(
                "queue_dir {:?} is not a directory",
                raw.queue_dir
            )));
        }
        let probe = raw.queue_dir.join("test");
        std::fs::File::create(&probe)
            .and_then(|_| std::fs::remove_file(&probe))
            .map_err(|_| {
                CertDeployError::config(format!("queue_dir {:?} is not writable", raw.queue_dir))
            })?;

        if raw.push_interval < 0 {
            return Err(CertDeployError::config("push_interval must be >= 0"));
        }
        if raw.push_retries < 0 {
            return Err(CertDeployError::config("push_retries must be >= 0"));
        }
        if raw.push_retry_interval < 0 {
            return Err(CertDeployError::config("push_retry_interval must be >= 0"));
        }
        if let Some(t) = raw.join_timeout {
            if t < 0.0 {
                return Err(CertDeployError::config("join_timeout must be >= 0"));
            }
        }
        if raw.renew_every < 1 {
            return Err(CertDeployError::config("renew_every must be > 0"));
        }
        let renew_unit = normalize_unit(&raw.renew_unit, raw.renew_every)?;
        if WEEKDAYS.contains(&renew_unit.as_str()) && raw.renew_every != 1 {
            return Err(CertDeployError::config(
                "renew_unit must not be a weekday if renew_every is set and not 1",
            ));
        }

        if raw.client_configs.is_empty() {
            return Err(CertDeployError::config("no client configs given"));
        }
        let mut clients = Vec::with_capacity(raw.client_configs.len());
        for raw_client in raw.client_configs {
            clients.push(raw_client.into_client_connection()?);
        }

        let renew_exec = raw
            .renew_exec
            .or_else(|| which("certbot"))
            .ok_or_else(|| CertDeployError::config("renew_exec not set and certbot not on PATH"))?;

        Ok(ServerConfig {
            privkey_filename: raw.privkey_filename,
            fail_fast: raw.fail_fast,
            log_level: parse_log_level(raw.log_level)?,
            log_filename: raw.log_filename,
            sftp_log_level: parse_log_level(raw.sftp_log_level)?,
            sftp_log_filename: raw.sftp_log_filename,
            renew_every: raw.renew_every,
            renew_unit,
            renew_at: raw.renew_at,
            renew_exec,
            renew_args: raw.renew_args,
            renew_timeout: raw.renew_timeout.map(Duration::from_secs_f64),
            push_mode: raw.push_mode,
            push_interval: Duration::from_secs(raw.push_interval as u64),
            push_retries: raw.push_retries as u32,
            push_retry_interval: Duration::from_secs(raw.push_retry_interval as u64),
            join_timeout: raw.join_timeout.map(Duration::from_secs_f64),
            queue_dir: raw.queue_dir,
            clients,
        })
    }
}

fn parse_log_level(raw: Option<String>) -> Result<LogLevel> {
    match raw {
        None => Ok(LogLevel::default()),
        Some(s) => s.parse(),
    }
}

fn which(name: &str) -> Option<String> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return candidate.to_str().map(|s| s.to_string());
        }
    }
    None
}

/// `schedule`'s interval units take a plural when the count isn't 1; we keep
/// that normalization so the renewal scheduler's naming matches the config.
fn normalize_unit(unit: &str, interval: i64) -> Result<String> {
    let norm = unit.trim().to_ascii_lowercase();
    if !WEEKDAYS.contains(&norm.as_str()) && !INTERVAL_UNITS.contains(&norm.as_str()) {
        return Err(CertDeployError::config(format!(
            "renew_unit needs to be a day of the week or an interval unit \
             (minute, hour, day, week), not: {unit}"
        )));
    }
    if interval != 1 {
        Ok(format!("{norm}s"))
    } else {
        Ok(norm)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawClientConnection {
    address: String,
    domains: Vec<String>,
    pubkey: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default = "default_client_path")]
    path: PathBuf,
    #[serde(default)]
    needs_chain: bool,
    #[serde(default = "default_true")]
    needs_fullchain: bool,
    #[serde(default = "default_true")]
    needs_privkey: bool,
    #[serde(default)]
    push_retries: Option<i64>,
    #[serde(default)]
    push_retry_interval: Option<i64>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}
fn default_client_path() -> PathBuf {
    PathBuf::from(DEFAULT_CLIENT_SOURCE_DIR)
}
fn default_true() -> bool {
    true
}

/// A single downstream client the server pushes certs to.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub address: String,
    pub domains: Vec<String>,
    pub pubkey: String,
    pub pubkey_blob: PublicKey,
    pub port: u16,
    pub username: String,
    pub path: PathBuf,
    pub needs_chain: bool,
    pub needs_fullchain: bool,
    pub needs_privkey: bool,
    pub push_retries: Option<u32>,
    pub push_retry_interval: Option<Duration>,
    /// `sha1(username + address + port)`, used to key the on-disk queue.
    pub hash: String,
}

impl RawClientConnection {
    fn into_client_connection(self) -> Result<ClientConnection> {
        let pubkey_text = self.pubkey.trim();
        let pubkey_blob = parse_client_pubkey(pubkey_text)?;
        if let Some(retries) = self.push_retries {
            if retries < 0 {
                return Err(CertDeployError::config("push_retries must be >= 0"));
            }
        }
        if let Some(interval) = self.push_retry_interval {
            if interval < 0 {
                return Err(CertDeployError::config("push_retry_interval must be >= 0"));
            }
        }
        let mut hasher = Sha1::new();
        hasher.update(format!("{}{}{}", self.username, self.address, self.port));
        let hash = format!("{:x}", hasher.finalize());
        Ok(ClientConnection {
            address: self.address,
            domains: self.domains,
            pubkey: self.pubkey,
            pubkey_blob,
            port: self.port,
            username: self.username,
            path: self.path,
            needs_chain: self.needs_chain,
            needs_fullchain: self.needs_fullchain,
            needs_privkey: self.needs_privkey,
            push_retries: self.push_retries.map(|n| n as u32),
            push_retry_interval: self.push_retry_interval.map(|n| Duration::from_secs(n as u64)),
            hash,
        })
    }
}

impl ClientConnection {
    /// Rendered as `user@[address]:port`, matching the Python `__str__`.
    pub fn display(&self) -> String {
        format!("{}@[{}]:{}", self.username, self.address, self.port)
    }
}

/// Parses an authorized-keys-style ed25519 public key line (with or without
/// the leading `ssh-ed25519` keyword).
fn parse_client_pubkey(text: &str) -> Result<PublicKey> {
    let candidate = if text.starts_with("ssh-ed25519 ") {
        text.to_string()
    } else {
        format!("ssh-ed25519 {text}")
    };
    PublicKey::from_openssh(&candidate)
        .map_err(|err| CertDeployError::config(format!("invalid client pubkey: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unit_pluralizes() {
        assert_eq!(normalize_unit("day", 2).unwrap(), "days");
        assert_eq!(normalize_unit("day", 1).unwrap(), "day");
    }

    #[test]
    fn normalize_unit_rejects_unknown() {
        assert!(normalize_unit("fortnight", 1).is_err());
    }

    #[test]
    fn normalize_unit_rejects_weekday_with_interval() {
        assert!(normalize_unit("monday", 2).is_err());
        assert!(normalize_unit("monday", 1).is_ok());
    }

    #[test]
    fn parses_pubkey_without_keyword() {
        // A syntactically valid (if not semantically meaningful) base64 blob
        // the same length class as a real ed25519 OpenSSH key won't parse
        // without real key bytes, so this only exercises the prefixing path.
        let err = parse_client_pubkey("not-a-real-key").unwrap_err();
        assert!(matches!(err, CertDeployError::Config(_)));
    }
}
