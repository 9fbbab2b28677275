//! Crate-wide error taxonomy.
use thiserror::Error;

/// Result type used throughout CertDeploy.
pub type Result<T> = std::result::Result<T, CertDeployError>;

/// Every error kind the server and client daemons can raise.
///
/// `Display` renders as `"<Kind>: <message>"`, which is the exact form written
/// to the log sink / stderr on a fatal error.
#[derive(Error, Debug)]
pub enum CertDeployError {
    /// Invalid configuration option, value, path, number, or choice.
    #[error("ConfigError: {0}")]
    Config(String),

    /// A staged `*.pem` file failed the structural PEM check.
    #[error("InvalidKey: {0}")]
    InvalidKey(String),

    /// A container-by-filters update matched no running container.
    #[error("ContainerNotFound: {0}")]
    ContainerNotFound(String),

    /// The container engine returned an error while restarting a container.
    #[error("ContainerError: {0}")]
    ContainerError(String),

    /// An orchestrator-service update matched no service.
    #[error("ServiceNotFound: {0}")]
    ServiceNotFound(String),

    /// The orchestrator returned an error while force-updating a service.
    #[error("ServiceError: {0}")]
    ServiceError(String),

    /// `systemctl` (or equivalent) exited non-zero, timed out, or failed to spawn.
    #[error("SystemdError: {0}")]
    Systemd(String),

    /// An OpenRC/SysV-style rc service command exited non-zero, timed out, or
    /// failed to spawn.
    #[error("RCServiceError: {0}")]
    RCService(String),

    /// A configured script exited non-zero, timed out, or failed to spawn.
    #[error("ScriptError: {0}")]
    Script(String),

    /// An SSH/socket/SFTP failure while pushing to a client. Drives retry.
    #[error("TransportError: {0}")]
    Transport(String),

    /// IO error, e.g. reading/writing lineage files.
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error while loading a config file.
    #[error("ConfigError: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Umbrella used when re-raising any of the above to a supervising layer.
    #[error("CertDeployError: {0}")]
    Other(String),
}

impl CertDeployError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        CertDeployError::Config(msg.into())
    }

    pub fn invalid_key<S: Into<String>>(msg: S) -> Self {
        CertDeployError::InvalidKey(msg.into())
    }

    pub fn container_not_found<S: Into<String>>(msg: S) -> Self {
        CertDeployError::ContainerNotFound(msg.into())
    }

    pub fn container_error<S: Into<String>>(msg: S) -> Self {
        CertDeployError::ContainerError(msg.into())
    }

    pub fn service_not_found<S: Into<String>>(msg: S) -> Self {
        CertDeployError::ServiceNotFound(msg.into())
    }

    pub fn service_error<S: Into<String>>(msg: S) -> Self {
        CertDeployError::ServiceError(msg.into())
    }

    pub fn systemd<S: Into<String>>(msg: S) -> Self {
        CertDeployError::Systemd(msg.into())
    }

    pub fn rc_service<S: Into<String>>(msg: S) -> Self {
        CertDeployError::RCService(msg.into())
    }

    pub fn script<S: Into<String>>(msg: S) -> Self {
        CertDeployError::Script(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        CertDeployError::Transport(msg.into())
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        CertDeployError::Other(msg.into())
    }

    /// True for the errors produced by the update-service dispatch that
    /// `fail_fast = false` should recover from locally instead of propagating.
    pub fn is_update_error(&self) -> bool {
        matches!(
            self,
            CertDeployError::ContainerNotFound(_)
                | CertDeployError::ContainerError(_)
                | CertDeployError::ServiceNotFound(_)
                | CertDeployError::ServiceError(_)
                | CertDeployError::Systemd(_)
                | CertDeployError::RCService(_)
                | CertDeployError::Script(_)
        )
    }
}
