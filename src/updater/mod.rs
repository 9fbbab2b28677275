//! Applies a client's `update_services[]` once new certs have been promoted
//! (§4.C). One `dispatch()` call per `ServiceUpdate`, with `fail_fast`
//! controlling whether an individual failure halts the whole batch.
pub mod docker;
pub mod process;

use tracing::{debug, error, info};

use crate::config::service::ServiceUpdate;
use crate::config::ClientConfig;
use crate::error::Result;

/// Runs every configured service update in order, returning the first error
/// if `config.fail_fast` is set, otherwise logging and continuing past any
/// error `CertDeployError::is_update_error()` considers recoverable.
pub async fn update_services(config: &ClientConfig) -> Result<()> {
    for service in &config.services {
        debug!(service = %service.describe(), "updating");
        let outcome = dispatch(service, config).await;
        if let Err(err) = outcome {
            if config.fail_fast || !err.is_update_error() {
                return Err(err);
            }
            error!(service = %service.describe(), %err, "service update failed");
            continue;
        }
        info!(service = %service.describe(), "service updated");
    }
    Ok(())
}

async fn dispatch(service: &ServiceUpdate, config: &ClientConfig) -> Result<()> {
    match service {
        ServiceUpdate::DockerContainer { .. } => docker::update_container(service, config).await,
        ServiceUpdate::DockerService { .. } => docker::update_service(service, config).await,
        ServiceUpdate::RcService { name, action, timeout } => {
            process::run_init_command(
                config
                    .rc_service_exec
                    .as_deref()
                    .ok_or_else(|| crate::error::CertDeployError::rc_service(
                        "no rc_service_exec configured or found on PATH",
                    ))?,
                &[name.as_str(), action.as_str()],
                *timeout,
                process::InitKind::Rc,
            )
            .await
        }
        ServiceUpdate::SystemdUnit { name, action, timeout } => {
            process::run_init_command(
                config
                    .systemd_exec
                    .as_deref()
                    .ok_or_else(|| crate::error::CertDeployError::systemd(
                        "no systemd_exec configured or found on PATH",
                    ))?,
                &[action.as_str(), name.as_str()],
                *timeout,
                process::InitKind::Systemd,
            )
            .await
        }
        ServiceUpdate::Script { script_path, timeout } => {
            process::run_script(script_path, *timeout).await
        }
    }
}
