//! Pushes one lineage to one client over SFTP, with retry/backoff (§4.F).
//! The SSH/SFTP mechanics sit behind [`PushTransport`] so the retry loop is
//! unit-testable without a real socket, mirroring `Server._sync_client`.
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConnection, ServerConfig};
use crate::error::{CertDeployError, Result};
use crate::types::Lineage;

/// Abstracts "connect to a client and copy a lineage's files over SFTP" so
/// tests can swap in a fake that fails on command without touching a socket.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn push(&self, client: &ClientConnection, lineage: &Lineage, privkey_filename: &std::path::Path) -> Result<()>;
}

/// The real transport: opens an SSH session authenticated with the server's
/// private key against the client's pinned public key, then an SFTP
/// subsystem to copy the needed files, creating the remote directory first.
pub struct RusshPushTransport;

#[async_trait]
impl PushTransport for RusshPushTransport {
    async fn push(
        &self,
        client: &ClientConnection,
        lineage: &Lineage,
        privkey_filename: &std::path::Path,
    ) -> Result<()> {
        let key = russh::keys::load_secret_key(privkey_filename, None)
            .map_err(|err| CertDeployError::transport(format!("loading server key: {err}")))?;
        let config = std::sync::Arc::new(russh::client::Config::default());
        let mut session = russh::client::connect(
            config,
            (client.address.as_str(), client.port),
            ClientVerifier { expected: client.pubkey_blob.clone() },
        )
        .await
        .map_err(|err| CertDeployError::transport(format!("connecting to {}: {err}", client.display())))?;
        let authenticated = session
            .authenticate_publickey(&client.username, std::sync::Arc::new(key))
            .await
            .map_err(|err| CertDeployError::transport(err.to_string()))?;
        if !authenticated.success() {
            return Err(CertDeployError::transport(format!(
                "authentication rejected by {}",
                client.display()
            )));
        }
        let channel = session
            .channel_open_session()
            .await
            .map_err(|err| CertDeployError::transport(err.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| CertDeployError::transport(err.to_string()))?;
        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| CertDeployError::transport(err.to_string()))?;

        let cert_dir = client
            .path
            .join(lineage.path.file_name().unwrap_or_default());
        sftp_mkdir(&sftp, &cert_dir).await?;

        for (needed, filename) in [
            (client.needs_chain, crate::types::CHAIN_FILENAME),
            (client.needs_fullchain, crate::types::FULLCHAIN_FILENAME),
            (client.needs_privkey, crate::types::PRIVKEY_FILENAME),
        ] {
            if !needed {
                continue;
            }
            let local = lineage.file(filename);
            let remote = cert_dir.join(filename);
            debug!(from = %local.display(), to = %remote.display(), "copying");
            put_file(&sftp, &local, &remote).await?;
        }
        Ok(())
    }
}

async fn sftp_mkdir(sftp: &russh_sftp::client::SftpSession, path: &std::path::Path) -> Result<()> {
    // Recurse to the parent first, matching `_sftp_mkdir`'s top-down
    // directory creation. Stops at an empty/root path.
    let path_str = path.to_string_lossy().to_string();
    if path_str.is_empty() || path_str == "/" {
        return Ok(());
    }
    if sftp.metadata(&path_str).await.is_ok() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        Box::pin(sftp_mkdir(sftp, parent)).await?;
    }
    sftp.create_dir(&path_str)
        .await
        .map_err(|err| CertDeployError::transport(format!("mkdir {path_str}: {err}")))
}

async fn put_file(
    sftp: &russh_sftp::client::SftpSession,
    local: &std::path::Path,
    remote: &std::path::Path,
) -> Result<()> {
    let bytes = tokio::fs::read(local).await?;
    let remote_str = remote.to_string_lossy().to_string();
    let mut file = sftp
        .create(&remote_str)
        .await
        .map_err(|err| CertDeployError::transport(format!("creating {remote_str}: {err}")))?;
    use tokio::io::AsyncWriteExt;
    file.write_all(&bytes)
        .await
        .map_err(|err| CertDeployError::transport(format!("writing {remote_str}: {err}")))?;
    Ok(())
}

struct ClientVerifier {
    expected: russh::keys::ssh_key::PublicKey,
}

#[async_trait]
impl russh::client::Handler for ClientVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(server_public_key == &self.expected)
    }
}

/// Retries `transport.push` per the server's (or the client's override of)
/// `push_retries`/`push_retry_interval`, returning the last error if every
/// attempt fails.
pub async fn push_with_retry(
    transport: &dyn PushTransport,
    server_config: &ServerConfig,
    client: &ClientConnection,
    lineage: &Lineage,
) -> Result<()> {
    let retries = client.push_retries.unwrap_or(server_config.push_retries);
    let retry_interval = client
        .push_retry_interval
        .unwrap_or(server_config.push_retry_interval);
    let mut attempt = 0;
    loop {
        match transport
            .push(client, lineage, &server_config.privkey_filename)
            .await
        {
            Ok(()) => {
                info!(client = %client.display(), "pushed");
                return Ok(());
            }
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!(client = %client.display(), attempt, %err, "push failed, retrying");
                tokio::time::sleep(retry_interval).await;
            }
            Err(err) => {
                error!(client = %client.display(), %err, "push failed, giving up");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyTransport {
        fail_times: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PushTransport for FlakyTransport {
        async fn push(&self, _client: &ClientConnection, _lineage: &Lineage, _privkey: &std::path::Path) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(CertDeployError::transport("simulated failure"))
            } else {
                Ok(())
            }
        }
    }

    fn client() -> ClientConnection {
        ClientConnection {
            address: "127.0.0.1".into(),
            domains: vec!["example.com".into()],
            pubkey: String::new(),
            pubkey_blob: test_pubkey(),
            port: 22,
            username: "certdeploy".into(),
            path: PathBuf::from("/certdeploy/new-certs"),
            needs_chain: false,
            needs_fullchain: true,
            needs_privkey: true,
            push_retries: None,
            push_retry_interval: Some(Duration::from_millis(1)),
            hash: "abc".into(),
        }
    }

    fn test_pubkey() -> russh::keys::ssh_key::PublicKey {
        use russh::keys::ssh_key::private::Ed25519Keypair;
        let keypair = Ed25519Keypair::from_bytes(&[7u8; 64]).expect("deterministic test key");
        russh::keys::ssh_key::PublicKey::from(keypair.public)
    }

    fn server_config(push_retries: u32) -> ServerConfig {
        use crate::config::PushMode;
        ServerConfig {
            privkey_filename: PathBuf::from("/dev/null"),
            fail_fast: false,
            log_level: crate::config::LogLevel::default(),
            log_filename: None,
            sftp_log_level: crate::config::LogLevel::default(),
            sftp_log_filename: None,
            renew_every: 1,
            renew_unit: "day".into(),
            renew_at: None,
            renew_exec: "true".into(),
            renew_args: vec!["renew".into()],
            renew_timeout: None,
            push_mode: PushMode::Serial,
            push_interval: Duration::ZERO,
            push_retries,
            push_retry_interval: Duration::from_millis(1),
            join_timeout: None,
            queue_dir: PathBuf::from("/tmp"),
            clients: Vec::new(),
        }
    }

    #[tokio::test]
    async fn retries_up_to_configured_limit_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = FlakyTransport { fail_times: 2, calls: calls.clone() };
        let config = server_config(2);
        let result = push_with_retry(&transport, &config, &client(), &lineage()).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = FlakyTransport { fail_times: 10, calls: calls.clone() };
        let config = server_config(1);
        let result = push_with_retry(&transport, &config, &client(), &lineage()).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn lineage() -> Lineage {
        Lineage { name: "example.com".into(), path: PathBuf::from("/queue/example.com") }
    }
}
