//! The server side: matches a renewed lineage against configured clients,
//! queues it, and dispatches it out (§4.F/G/I), plus the renewal scheduler
//! (§4.H).
pub mod dispatcher;
pub mod queue;
pub mod scheduler;
pub mod worker;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::types::Lineage;

use self::queue::Queue;
use self::worker::{PushTransport, RusshPushTransport};

/// Matches `lineage`'s domains against every configured client and queues it
/// for whichever ones need it, mirroring `Server.sync`'s domain match (the
/// first matching domain per client wins, same as the Python `break`).
pub fn sync(config: &ServerConfig, queue: &Queue, lineage: &Lineage, domains: &[String]) {
    for client in &config.clients {
        for domain in domains {
            if client.domains.iter().any(|d| d == domain) {
                debug!(client = %client.display(), lineage = %lineage.name, "queuing");
                queue.push(&client.hash, lineage.clone());
                break;
            }
        }
    }
}

/// Runs one dispatch pass against the real SSH/SFTP transport.
pub async fn dispatch_once(config: &ServerConfig, queue: &Queue) -> Result<()> {
    let transport: Arc<dyn PushTransport> = Arc::new(RusshPushTransport);
    dispatcher::dispatch(queue, config, transport).await
}

/// Runs the renewal scheduler and a queue-drain loop side by side, forever.
/// `renew_certs` is expected to be followed by an external call into `sync`
/// (via the Certbot renewal hook re-invoking this binary in `--push` mode,
/// per the original's hook-based design) before this loop's next drain.
pub async fn serve_forever(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    let queue = Arc::new(Queue::new());

    let scheduler_config = (*config).clone();
    let mut scheduler = tokio::spawn(scheduler::serve_forever(scheduler_config));

    let dispatch_config = Arc::clone(&config);
    let dispatch_queue = Arc::clone(&queue);
    let mut dispatcher = tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            if dispatch_queue.is_empty() {
                continue;
            }
            if let Err(err) = dispatch_once(&dispatch_config, &dispatch_queue).await {
                tracing::error!(%err, "dispatch failed");
                if dispatch_config.fail_fast {
                    break;
                }
            }
        }
    });

    let join_timeout = config
        .join_timeout
        .unwrap_or(std::time::Duration::from_secs(10));

    tokio::select! {
        result = &mut scheduler => {
            dispatcher.abort();
            result.map_err(|e| crate::error::CertDeployError::other(e.to_string()))?
        }
        _ = &mut dispatcher => Ok(()),
        _ = shutdown_signal() => {
            info!("received shutdown signal, stopping scheduler and dispatcher");
            scheduler.abort();
            dispatcher.abort();
            let _ = tokio::time::timeout(join_timeout, async {
                let _ = (&mut scheduler).await;
                let _ = (&mut dispatcher).await;
            }).await;
            Ok(())
        }
    }
}

/// Resolves once a process-level termination signal arrives (Ctrl-C or
/// SIGTERM), so the scheduler and dispatcher can be joined and stopped
/// gracefully instead of killed outright.
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

/// Runs until the queue is drained once (`--push` one-shot mode).
pub async fn run_until_drained(config: &ServerConfig, queue: &Queue) -> Result<()> {
    while !queue.is_empty() {
        dispatch_once(config, queue).await?;
    }
    Ok(())
}
