//! Coalesces bursts of deployed lineages into a single delayed
//! `update_services` run (§4.E), replacing the Python daemon's polling
//! `_Update` thread with a `tokio` task woken by `Notify`.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::updater::update_services;

/// Shared state the accept loop and the update task coordinate through:
/// each new deploy pushes the deadline out by `update_delay`, and only the
/// most recently scheduled deadline actually results in an update run.
pub struct UpdateCoordinator {
    config: Arc<ClientConfig>,
    deadline: Mutex<Option<Instant>>,
    notify: Notify,
}

impl UpdateCoordinator {
    pub fn new(config: Arc<ClientConfig>) -> Arc<Self> {
        Arc::new(UpdateCoordinator {
            config,
            deadline: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    /// Called after a successful `deploy()` pushes the run out by
    /// `update_delay` from now, scheduling a run if none is pending yet.
    pub async fn schedule(self: &Arc<Self>) {
        let mut deadline = self.deadline.lock().await;
        let new_deadline = Instant::now() + self.config.update_delay;
        debug!(?new_deadline, "update deadline reset");
        *deadline = Some(new_deadline);
        self.notify.notify_one();
    }

    /// Runs forever, firing `update_services` once per coalesced deadline.
    /// Spawn this once per daemon lifetime.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.notify.notified().await;
            loop {
                let wait = {
                    let deadline = self.deadline.lock().await;
                    match *deadline {
                        None => break,
                        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                    }
                };
                if wait.is_zero() {
                    break;
                }
                tokio::time::sleep(wait).await;
            }
            let fired = {
                let mut deadline = self.deadline.lock().await;
                deadline.take().is_some()
            };
            if !fired {
                continue;
            }
            info!("updating services");
            if let Err(err) = self.run_update().await {
                error!(%err, "update_services failed");
                if self.config.fail_fast {
                    std::process::exit(1);
                }
            }
        }
    }

    async fn run_update(&self) -> Result<()> {
        update_services(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::client::SftpdConfig;
    use crate::config::client::Permissions;
    use crate::config::LogLevel;

    fn config(delay: Duration) -> Arc<ClientConfig> {
        Arc::new(ClientConfig {
            destination: "/tmp".into(),
            source: "/tmp".into(),
            sftpd: SftpdConfig {
                listen_port: 22,
                listen_address: String::new(),
                username: "certdeploy".into(),
                privkey_filename: None,
                server_pubkey: None,
                server_pubkey_filename: None,
                log_level: LogLevel::default(),
                log_filename: None,
                socket_backlog: 10,
            },
            systemd_exec: None,
            rc_service_exec: None,
            docker_url: "unix://var/run/docker.sock".into(),
            docker_timeout: None,
            init_timeout: None,
            script_timeout: None,
            services: Vec::new(),
            update_delay: delay,
            fail_fast: false,
            permissions: Permissions::default(),
            log_level: LogLevel::default(),
            log_filename: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_coalesces_bursts() {
        let coordinator = UpdateCoordinator::new(config(Duration::from_millis(100)));
        let runner = tokio::spawn(coordinator.clone().run());
        coordinator.schedule().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.schedule().await; // pushes the deadline out again
        tokio::time::sleep(Duration::from_millis(80)).await;
        // first deadline (100ms from t=0) has passed but was superseded; the
        // second deadline (100ms from t=50) should have fired by t=130
        tokio::time::sleep(Duration::from_millis(200)).await;
        let pending = coordinator.deadline.lock().await.is_none();
        assert!(pending);
        runner.abort();
    }
}
