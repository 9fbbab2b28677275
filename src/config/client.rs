//! Client-side configuration: `ClientConfig`, `SftpdConfig`, `Permissions`
//! (§4.A, §6).
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::service::{DefaultTimeouts, RawServiceUpdate, ServiceUpdate};
use super::{parse_duration, parse_mode, LogLevel, ModeValue};
use crate::error::{CertDeployError, Result};

const DEFAULT_CLIENT_SOURCE_DIR: &str = "/certdeploy/new-certs";
const DEFAULT_USERNAME: &str = "certdeploy";
const DEFAULT_PORT: u16 = 22;
const DEFAULT_DOCKER_URL: &str = "unix://var/run/docker.sock";
const DEFAULT_SOCKET_BACKLOG: i64 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSftpdConfig {
    #[serde(default = "default_port")]
    listen_port: u16,
    #[serde(default)]
    listen_address: String,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default)]
    privkey_filename: Option<PathBuf>,
    #[serde(default)]
    server_pubkey: Option<String>,
    #[serde(default)]
    server_pubkey_filename: Option<PathBuf>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    log_filename: Option<PathBuf>,
    #[serde(default = "default_socket_backlog")]
    socket_backlog: i64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}
fn default_socket_backlog() -> i64 {
    DEFAULT_SOCKET_BACKLOG
}

/// The client's embedded SFTP server: who it listens as, and who it trusts.
#[derive(Debug, Clone)]
pub struct SftpdConfig {
    pub listen_port: u16,
    pub listen_address: String,
    pub username: String,
    pub privkey_filename: Option<PathBuf>,
    pub server_pubkey: Option<String>,
    pub server_pubkey_filename: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_filename: Option<PathBuf>,
    pub socket_backlog: u32,
}

impl RawSftpdConfig {
    fn into_sftpd_config(self) -> Result<SftpdConfig> {
        if self.server_pubkey.is_none() && self.server_pubkey_filename.is_none() {
            return Err(CertDeployError::config(
                "sftpd needs either server_pubkey or server_pubkey_filename",
            ));
        }
        if self.socket_backlog < 0 {
            return Err(CertDeployError::config("sftpd.socket_backlog must be >= 0"));
        }
        Ok(SftpdConfig {
            listen_port: self.listen_port,
            listen_address: self.listen_address,
            username: self.username,
            privkey_filename: self.privkey_filename,
            server_pubkey: self.server_pubkey,
            server_pubkey_filename: self.server_pubkey_filename,
            log_level: match self.log_level {
                None => LogLevel::default(),
                Some(s) => s.parse()?,
            },
            log_filename: self.log_filename,
            socket_backlog: self.socket_backlog as u32,
        })
    }
}

/// A file owner/group/mode triple applied to deployed lineage files.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    pub owner: Option<OwnerRef>,
    pub group: Option<OwnerRef>,
    pub mode: Option<u32>,
    pub directory_mode: Option<u32>,
}

/// A unix user or group, as either a name or a numeric id.
#[derive(Debug, Clone)]
pub enum OwnerRef {
    Name(String),
    Id(u32),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawPermissions {
    #[serde(default)]
    owner: Option<RawOwnerRef>,
    #[serde(default)]
    group: Option<RawOwnerRef>,
    #[serde(default)]
    mode: Option<ModeValue>,
    #[serde(default)]
    directory_mode: Option<ModeValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawOwnerRef {
    Id(u32),
    Name(String),
}

impl RawPermissions {
    fn into_permissions(self) -> Result<Permissions> {
        Ok(Permissions {
            owner: self.owner.map(|o| match o {
                RawOwnerRef::Id(id) => OwnerRef::Id(id),
                RawOwnerRef::Name(name) => OwnerRef::Name(name),
            }),
            group: self.group.map(|g| match g {
                RawOwnerRef::Id(id) => OwnerRef::Id(id),
                RawOwnerRef::Name(name) => OwnerRef::Name(name),
            }),
            mode: self.mode.as_ref().map(parse_mode).transpose()?,
            directory_mode: self.directory_mode.as_ref().map(parse_mode).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawClientConfig {
    destination: PathBuf,
    #[serde(default = "default_source_dir")]
    source: PathBuf,
    #[serde(default)]
    sftpd: RawSftpdConfig,
    #[serde(default)]
    systemd_exec: Option<String>,
    #[serde(default)]
    rc_service_exec: Option<String>,
    #[serde(default = "default_docker_url")]
    docker_url: String,
    #[serde(default)]
    docker_timeout: Option<f64>,
    #[serde(default)]
    init_timeout: Option<f64>,
    #[serde(default)]
    script_timeout: Option<f64>,
    #[serde(default)]
    update_services: Vec<RawServiceUpdate>,
    #[serde(default = "default_update_delay")]
    update_delay: Option<String>,
    #[serde(default)]
    fail_fast: bool,
    #[serde(default)]
    file_permissions: RawPermissions,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    log_filename: Option<PathBuf>,
}

// `sftpd` is itself an optional block in the YAML; when absent we fall back
// to a config that still requires `server_pubkey*` elsewhere to be set,
// matching Python's "dict with arguments" default of `{}`.
impl Default for RawSftpdConfig {
    fn default() -> Self {
        RawSftpdConfig {
            listen_port: DEFAULT_PORT,
            listen_address: String::new(),
            username: DEFAULT_USERNAME.to_string(),
            privkey_filename: None,
            server_pubkey: None,
            server_pubkey_filename: None,
            log_level: None,
            log_filename: None,
            socket_backlog: DEFAULT_SOCKET_BACKLOG,
        }
    }
}

impl Default for RawPermissions {
    fn default() -> Self {
        RawPermissions {
            owner: None,
            group: None,
            mode: None,
            directory_mode: None,
        }
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CLIENT_SOURCE_DIR)
}
fn default_docker_url() -> String {
    DEFAULT_DOCKER_URL.to_string()
}
fn default_update_delay() -> Option<String> {
    Some("1h".to_string())
}

/// Validated client configuration (mirrors Python's `Config` + `ClientConfig`).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub destination: PathBuf,
    pub source: PathBuf,
    pub sftpd: SftpdConfig,
    pub systemd_exec: Option<String>,
    pub rc_service_exec: Option<String>,
    pub docker_url: String,
    pub docker_timeout: Option<f64>,
    pub init_timeout: Option<f64>,
    pub script_timeout: Option<f64>,
    pub services: Vec<ServiceUpdate>,
    pub update_delay: Duration,
    pub fail_fast: bool,
    pub permissions: Permissions,
    pub log_level: LogLevel,
    pub log_filename: Option<PathBuf>,
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawClientConfig = serde_yaml::from_str(&text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawClientConfig) -> Result<Self> {
        if !raw.source.is_dir() {
            return Err(CertDeployError::config(format!(
                "source {:?} is not a directory",
                raw.source
            )));
        }
        if !raw.destination.is_dir() {
            return Err(CertDeployError::config(format!(
                "destination {:?} is not a directory",
                raw.destination
            )));
        }
        let defaults = DefaultTimeouts {
            docker: raw.docker_timeout,
            init: raw.init_timeout,
            script: raw.script_timeout,
        };
        let mut services = Vec::with_capacity(raw.update_services.len());
        for raw_service in raw.update_services {
            services.push(raw_service.into_service_update(defaults)?);
        }
        let update_delay = parse_duration(raw.update_delay.as_deref())?;
        let permissions = raw.file_permissions.into_permissions()?;
        let sftpd = raw.sftpd.into_sftpd_config()?;

        Ok(ClientConfig {
            destination: raw.destination,
            source: raw.source,
            sftpd,
            systemd_exec: raw.systemd_exec.or_else(|| which("systemctl")),
            rc_service_exec: raw.rc_service_exec.or_else(|| which("rc-service")),
            docker_url: raw.docker_url,
            docker_timeout: raw.docker_timeout,
            init_timeout: raw.init_timeout,
            script_timeout: raw.script_timeout,
            services,
            update_delay,
            fail_fast: raw.fail_fast,
            permissions,
            log_level: match raw.log_level {
                None => LogLevel::default(),
                Some(s) => s.parse()?,
            },
            log_filename: raw.log_filename,
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn minimal_config(dir: &Path) -> RawClientConfig {
        RawClientConfig {
            destination: dir.to_path_buf(),
            source: dir.to_path_buf(),
            sftpd: RawSftpdConfig {
                server_pubkey: Some("AAAAC3NzaC1lZDI1NTE5AAAAINotARealKeyXXXXXXXXXXXXXXXXXXXX".into()),
                ..RawSftpdConfig::default()
            },
            systemd_exec: None,
            rc_service_exec: None,
            docker_url: DEFAULT_DOCKER_URL.to_string(),
            docker_timeout: None,
            init_timeout: None,
            script_timeout: None,
            update_services: Vec::new(),
            update_delay: None,
            fail_fast: false,
            file_permissions: RawPermissions::default(),
            log_level: None,
            log_filename: None,
        }
    }

    #[test]
    fn rejects_missing_source_dir() {
        let dir = tempdir().unwrap();
        let mut raw = minimal_config(dir.path());
        raw.source = dir.path().join("does-not-exist");
        assert!(ClientConfig::from_raw(raw).is_err());
    }

    #[test]
    fn accepts_minimal_config() {
        let dir = tempdir().unwrap();
        let raw = minimal_config(dir.path());
        let config = ClientConfig::from_raw(raw).unwrap();
        assert_eq!(config.update_delay, Duration::ZERO);
    }

    #[test]
    fn sftpd_requires_a_trusted_pubkey() {
        let dir = tempdir().unwrap();
        let mut raw = minimal_config(dir.path());
        raw.sftpd.server_pubkey = None;
        assert!(ClientConfig::from_raw(raw).is_err());
    }

    #[test]
    fn load_reads_yaml_from_disk() {
        let dir = tempdir().unwrap();
        let yaml = format!(
            "destination: {dest:?}\nsource: {src:?}\nsftpd:\n  server_pubkey: \"AAAAC3NzaC1lZDI1NTE5AAAAINotARealKeyXXXXXXXXXXXXXXXXXXXX\"\n",
            dest = dir.path(),
            src = dir.path(),
        );
        let config_path = dir.path().join("client.yml");
        fs::write(&config_path, yaml).unwrap();
        let config = ClientConfig::load(&config_path).unwrap();
        assert_eq!(config.destination, dir.path());
    }
}
