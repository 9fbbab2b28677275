//! Fans queued pushes out to clients, serially or in parallel (§4.G).
use std::sync::Arc;

use tracing::error;

use crate::config::{PushMode, ServerConfig};
use crate::error::Result;

use super::queue::Queue;
use super::worker::{push_with_retry, PushTransport};

/// Drains `queue` and pushes every entry to its matching client, per
/// `server_config.push_mode`. Serial dispatch paces each attempt
/// `push_interval` apart — including after the last client, so that a
/// follow-up call to `dispatch` (e.g. the hook firing twice back to back)
/// is still paced (see DESIGN.md Open Questions).
pub async fn dispatch(
    queue: &Queue,
    server_config: &ServerConfig,
    transport: Arc<dyn PushTransport>,
) -> Result<()> {
    let entries = queue.drain();
    if entries.is_empty() {
        return Ok(());
    }
    match server_config.push_mode {
        PushMode::Serial => dispatch_serial(entries, server_config, transport).await,
        PushMode::Parallel => dispatch_parallel(entries, server_config, transport).await,
    }
}

async fn dispatch_serial(
    entries: Vec<super::queue::QueueEntry>,
    server_config: &ServerConfig,
    transport: Arc<dyn PushTransport>,
) -> Result<()> {
    for entry in entries {
        let Some(client) = find_client(server_config, &entry.client_hash) else {
            continue;
        };
        let result = push_with_retry(transport.as_ref(), server_config, client, &entry.lineage).await;
        if let Err(err) = result {
            if server_config.fail_fast {
                return Err(err);
            }
            error!(client = %client.display(), %err, "serial push failed");
        }
        tokio::time::sleep(server_config.push_interval).await;
    }
    Ok(())
}

async fn dispatch_parallel(
    entries: Vec<super::queue::QueueEntry>,
    server_config: &ServerConfig,
    transport: Arc<dyn PushTransport>,
) -> Result<()> {
    let mut handles = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let Some(client) = find_client(server_config, &entry.client_hash).cloned() else {
            continue;
        };
        let transport = Arc::clone(&transport);
        let server_config = server_config.clone();
        let pacing = server_config.push_interval * index as u32;
        handles.push(tokio::spawn(async move {
            tokio::time::sleep(pacing).await;
            push_with_retry(transport.as_ref(), &server_config, &client, &entry.lineage).await
        }));
    }
    let mut first_error = None;
    for handle in handles {
        let joined = match server_config.join_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, handle).await {
                Ok(result) => result,
                Err(_) => {
                    let err = crate::error::CertDeployError::transport(
                        "timed out waiting for a push worker to join",
                    );
                    if server_config.fail_fast {
                        return Err(err);
                    }
                    first_error.get_or_insert(err);
                    continue;
                }
            },
            None => handle.await,
        };
        if let Ok(Err(err)) = joined {
            if server_config.fail_fast {
                return Err(err);
            }
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) if server_config.fail_fast => Err(err),
        _ => Ok(()),
    }
}

fn find_client<'a>(
    server_config: &'a ServerConfig,
    client_hash: &str,
) -> Option<&'a crate::config::ClientConnection> {
    server_config.clients.iter().find(|c| c.hash == client_hash)
}
