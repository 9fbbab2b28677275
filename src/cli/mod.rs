//! CLI entry points: argument parsing, logging setup, and dispatch to the
//! server/client daemon logic (§4.L), mirroring `_main.py::_run` in both the
//! original server and client.
pub mod args;

use std::path::PathBuf;

use tracing::{debug, error};

use crate::config::{ClientConfig, ServerConfig};
use crate::error::{CertDeployError, Result};
use crate::types::Lineage;

pub use args::{ClientArgs, ServerArgs};

/// Runs the `certdeploy-server` binary to completion.
pub async fn run_server(args: ServerArgs) -> Result<()> {
    let mut config = ServerConfig::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.log_filename.is_some() {
        config.log_filename = args.log_filename.clone();
    }
    if let Some(level) = args.sftp_log_level {
        config.sftp_log_level = level;
    }
    if args.sftp_log_filename.is_some() {
        config.sftp_log_filename = args.sftp_log_filename.clone();
    }
    crate::logging::init(
        config.log_level,
        config.log_filename.as_deref(),
        config.sftp_log_level,
        config.sftp_log_filename.as_deref(),
    )?;

    if args.renew {
        debug!("running renew");
        return crate::server::scheduler::renew_certs(&config).await;
    }

    if args.daemon && !args.push {
        debug!("running daemon");
        return crate::server::serve_forever(config).await;
    }

    debug!("running manual push or hook");
    let domains = args.domain_list();
    if (args.lineage.is_none() || domains.is_empty()) && !args.push {
        error!(lineage = ?args.lineage, domains = ?domains, "could not find lineage or domains");
        return Err(CertDeployError::config(
            "either --lineage/--domains or --push must be given",
        ));
    }

    let queue = crate::server::queue::Queue::new();
    if let Some(lineage_path) = &args.lineage {
        if !domains.is_empty() {
            debug!("adding lineage to queue");
            let lineage = Lineage::new(PathBuf::from(lineage_path)).ok_or_else(|| {
                CertDeployError::config(format!("invalid lineage path: {lineage_path}"))
            })?;
            crate::server::sync(&config, &queue, &lineage, &domains);
        }
    }
    if args.push {
        debug!("running manual push without a running daemon");
        crate::server::run_until_drained(&config, &queue).await?;
    }
    Ok(())
}

/// Runs the `certdeploy-client` binary to completion.
pub async fn run_client(args: ClientArgs) -> Result<()> {
    let mut config = ClientConfig::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.log_filename.is_some() {
        config.log_filename = args.log_filename.clone();
    }
    let sftp_log_level = args.sftp_log_level.unwrap_or(config.sftpd.log_level);
    let sftp_log_filename = args
        .sftp_log_filename
        .clone()
        .or_else(|| config.sftpd.log_filename.clone());
    crate::logging::init(
        config.log_level,
        config.log_filename.as_deref(),
        sftp_log_level,
        sftp_log_filename.as_deref(),
    )?;

    if args.daemon {
        debug!("running daemon");
        return crate::client::serve_forever(config).await;
    }

    debug!("running one off deploy");
    if crate::client::deploy::deploy(&config)? {
        debug!("updating services");
        crate::updater::update_services(&config).await?;
    }
    Ok(())
}
