//! The client daemon: accepts pushes over SFTP, promotes them, and fires
//! `update_services` after a coalesced delay (§4.D/E).
pub mod coordinator;
pub mod deploy;
pub mod sftp;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use russh::keys::PrivateKey;
use russh::server::{Config as RusshConfig, Server as _};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{CertDeployError, Result};

use self::coordinator::UpdateCoordinator;
use self::deploy::deploy;
use self::sftp::SshServer;

/// Runs the client daemon until the process is killed: binds the configured
/// SFTP listener and spawns the update-coordinator task alongside it.
pub async fn serve_forever(config: ClientConfig) -> Result<()> {
    let config = Arc::new(config);
    let coordinator = UpdateCoordinator::new(Arc::clone(&config));
    tokio::spawn(Arc::clone(&coordinator).run());

    // An initial deploy in case the source directory was already populated
    // before the daemon started (matches the Python daemon's first-pass
    // behavior via the accept-loop's periodic `_deploy`).
    if deploy(&config)? {
        coordinator.schedule().await;
    }

    let host_key = load_host_key(&config)?;
    let address = if config.sftpd.listen_address.is_empty() {
        IpAddr::from([0, 0, 0, 0])
    } else {
        config
            .sftpd
            .listen_address
            .parse()
            .map_err(|err| CertDeployError::config(format!("invalid listen_address: {err}")))?
    };
    let socket_addr = SocketAddr::new(address, config.sftpd.listen_port);

    let russh_config = Arc::new(RusshConfig {
        keys: vec![host_key],
        ..Default::default()
    });

    info!(%socket_addr, "listening for incoming connections");
    let trusted_key = load_trusted_key(&config)?;
    let mut server = DaemonServer {
        config: Arc::clone(&config),
        coordinator,
        trusted_key,
    };
    tokio::select! {
        result = server.run_on_address(russh_config, socket_addr) => {
            result.map_err(|err| CertDeployError::transport(err.to_string()))
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal, closing listener");
            Ok(())
        }
    }
}

/// Resolves once a process-level termination signal arrives (Ctrl-C or
/// SIGTERM), so daemons can shut their accept loops down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn load_host_key(config: &ClientConfig) -> Result<PrivateKey> {
    let path = config.sftpd.privkey_filename.as_ref().ok_or_else(|| {
        CertDeployError::config("sftpd.privkey_filename must be set")
    })?;
    russh::keys::load_secret_key(path, None)
        .map_err(|err| CertDeployError::config(format!("loading {}: {err}", path.display())))
}

fn load_trusted_key(config: &ClientConfig) -> Result<russh::keys::ssh_key::PublicKey> {
    if let Some(text) = &config.sftpd.server_pubkey {
        return parse_pubkey_text(text);
    }
    if let Some(path) = &config.sftpd.server_pubkey_filename {
        let text = std::fs::read_to_string(path)?;
        return parse_pubkey_text(&text);
    }
    Err(CertDeployError::config(
        "sftpd needs either server_pubkey or server_pubkey_filename",
    ))
}

fn parse_pubkey_text(text: &str) -> Result<russh::keys::ssh_key::PublicKey> {
    let text = text.trim();
    let candidate = if text.starts_with("ssh-ed25519 ") {
        text.to_string()
    } else {
        format!("ssh-ed25519 {text}")
    };
    russh::keys::ssh_key::PublicKey::from_openssh(&candidate)
        .map_err(|err| CertDeployError::config(format!("invalid server_pubkey: {err}")))
}

struct DaemonServer {
    config: Arc<ClientConfig>,
    coordinator: Arc<UpdateCoordinator>,
    trusted_key: russh::keys::ssh_key::PublicKey,
}

impl russh::server::Server for DaemonServer {
    type Handler = SshServer;

    fn new_client(&mut self, peer: Option<std::net::SocketAddr>) -> Self::Handler {
        if let Some(peer) = peer {
            info!(%peer, "got connection");
        }
        SshServer::new(
            Arc::clone(&self.config),
            Arc::clone(&self.coordinator),
            self.trusted_key.clone(),
        )
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        warn!(%error, "session ended with an error");
    }
}

/// A single deploy-then-update pass, used by tests and by the accept loop
/// after a connection closes (mirrors `DeployServer._deploy`).
pub async fn deploy_and_schedule(
    config: &ClientConfig,
    coordinator: &Arc<UpdateCoordinator>,
) -> Result<()> {
    if deploy(config)? {
        coordinator.schedule().await;
    }
    Ok(())
}
