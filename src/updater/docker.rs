//! Docker Engine API backends: restart a running container or force-update
//! an orchestrator (Swarm) service, both matched by name or label filters.
use std::collections::HashMap;

use bollard::container::{ListContainersOptions, RestartContainerOptions};
use bollard::service::{ListServicesOptions, UpdateServiceOptions};
use bollard::Docker;

use crate::config::service::ServiceUpdate;
use crate::config::ClientConfig;
use crate::error::{CertDeployError, Result};

fn connect(docker_url: &str) -> Result<Docker> {
    Docker::connect_with_socket(docker_url, 120, bollard::API_DEFAULT_VERSION)
        .or_else(|_| Docker::connect_with_local_defaults())
        .map_err(|err| CertDeployError::container_error(format!("docker connect: {err}")))
}

pub async fn update_container(spec: &ServiceUpdate, config: &ClientConfig) -> Result<()> {
    let ServiceUpdate::DockerContainer { name, filters, timeout } = spec else {
        unreachable!("dispatch only calls this for DockerContainer")
    };
    let docker = connect(&config.docker_url)?;
    let options = ListContainersOptions::<String> {
        all: false,
        filters: to_string_filters(filters),
        ..Default::default()
    };
    let containers = docker
        .list_containers(Some(options))
        .await
        .map_err(|err| CertDeployError::container_error(err.to_string()))?;
    if containers.is_empty() {
        let message = format!("no running container matching name={name:?} filters={filters:?}");
        if config.fail_fast {
            return Err(CertDeployError::container_not_found(message));
        }
        tracing::error!("{message}");
        return Ok(());
    }
    let restart_opts = timeout
        .or_else(|| config.docker_timeout.map(std::time::Duration::from_secs_f64))
        .map(|d| RestartContainerOptions { t: d.as_secs() as i64 });
    for container in containers {
        let Some(id) = container.id.clone() else { continue };
        if let Err(err) = docker.restart_container(&id, restart_opts.clone()).await {
            let message = format!(
                "restarting container names={:?}: {err}",
                container.names
            );
            if config.fail_fast {
                return Err(CertDeployError::container_error(message));
            }
            tracing::error!("{message}");
            continue;
        }
        tracing::info!(names = ?container.names, "docker container restarted");
    }
    Ok(())
}

pub async fn update_service(spec: &ServiceUpdate, config: &ClientConfig) -> Result<()> {
    let ServiceUpdate::DockerService { name, filters, .. } = spec else {
        unreachable!("dispatch only calls this for DockerService")
    };
    let docker = connect(&config.docker_url)?;
    let services = if let Some(name) = name {
        match docker.inspect_service(name, None).await {
            Ok(service) => vec![service],
            Err(_) => Vec::new(),
        }
    } else {
        let options = ListServicesOptions::<String> {
            filters: to_string_filters(filters),
            ..Default::default()
        };
        docker
            .list_services(Some(options))
            .await
            .map_err(|err| CertDeployError::service_error(err.to_string()))?
    };
    if services.is_empty() {
        let message = format!("no orchestrator service matching name={name:?} filters={filters:?}");
        if config.fail_fast {
            return Err(CertDeployError::service_not_found(message));
        }
        tracing::error!("{message}");
        return Ok(());
    }
    for service in services {
        let (Some(id), Some(mut spec), Some(version)) = (
            service.id.clone(),
            service.spec.clone(),
            service.version.and_then(|v| v.index),
        ) else {
            continue;
        };
        spec.task_template = spec.task_template.map(|mut template| {
            template.force_update = Some(template.force_update.unwrap_or(0) + 1);
            template
        });
        let update_opts = UpdateServiceOptions {
            version,
            ..Default::default()
        };
        let response = match docker.update_service(&id, spec, update_opts, None).await {
            Err(err) => {
                let message = format!("force-updating service id={id}: {err}");
                if config.fail_fast {
                    return Err(CertDeployError::service_error(message));
                }
                tracing::error!("{message}");
                continue;
            }
            Ok(response) => response,
        };
        for warning in response.warnings.into_iter().flatten() {
            tracing::warn!(id, %warning, "docker engine warning");
        }
        tracing::info!(id, "docker service force-updated");
    }
    Ok(())
}

fn to_string_filters(filters: &HashMap<String, Vec<String>>) -> HashMap<String, Vec<String>> {
    filters.clone()
}
