//! Command-line argument parsing for both daemon binaries (§4.L).
use std::path::PathBuf;

use clap::Parser;

use crate::config::LogLevel;

pub const DEFAULT_SERVER_CONFIG: &str = "/etc/certdeploy/server.yml";
pub const DEFAULT_CLIENT_CONFIG: &str = "/etc/certdeploy/client.yml";

/// `certdeploy-server` — matches a renewed lineage against configured
/// clients and pushes it out, on a schedule or on demand.
#[derive(Parser, Debug)]
#[command(name = "certdeploy-server", version, about = "CertDeploy server daemon")]
pub struct ServerArgs {
    /// The path to the CertDeploy server config.
    #[arg(long, env = "CERTDEPLOY_SERVER_CONFIG", default_value = DEFAULT_SERVER_CONFIG)]
    pub config: PathBuf,

    /// The path of a renewed lineage (e.g. `/etc/letsencrypt/live/example.com`).
    /// Mutually exclusive with `--daemon`.
    #[arg(long, env = "RENEWED_LINEAGE")]
    pub lineage: Option<String>,

    /// A space separated list of domains in the lineage (e.g. `"www.example.com example.com"`).
    /// Mutually exclusive with `--daemon`.
    #[arg(long, env = "RENEWED_DOMAINS", default_value = "")]
    pub domains: String,

    /// Run the daemon. Without this option the server runs once and exits.
    #[arg(long, env = "CERTDEPLOY_SERVER_DAEMON")]
    pub daemon: bool,

    /// Run the cert renewal part of the daemon once and exit.
    #[arg(long, env = "CERTDEPLOY_SERVER_RENEW_ONLY")]
    pub renew: bool,

    /// Run until the push queue is drained, then exit. Combine with
    /// `--lineage`/`--domains` to populate the queue first.
    // The original project's own env var name has this typo; kept verbatim
    // so existing operator configs and hook scripts keep working.
    #[arg(long, env = "CERTDEPOLY_SERVER_PUSH_ONLY")]
    pub push: bool,

    /// The CertDeploy log level. Defaults to the value in the config file,
    /// or ERROR.
    #[arg(long, env = "CERTDEPLOY_SERVER_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// The path to the CertDeploy log file. Defaults to stdout.
    #[arg(long, env = "CERTDEPLOY_SERVER_LOG_FILENAME")]
    pub log_filename: Option<PathBuf>,

    /// The SFTP transport log level. Defaults to ERROR.
    #[arg(long, env = "CERTDEPOLY_SFTP_LOG_LEVEL")]
    pub sftp_log_level: Option<LogLevel>,

    /// The path to the SFTP transport log file. Defaults to stdout.
    #[arg(long, env = "CERTDEPOLY_SFTP_LOG_FILENAME")]
    pub sftp_log_filename: Option<PathBuf>,
}

impl ServerArgs {
    /// Parses `--domains` into its constituent domain names.
    pub fn domain_list(&self) -> Vec<String> {
        self.domains.split_whitespace().map(str::to_string).collect()
    }
}

/// `certdeploy-client` — accepts pushed lineages over SFTP and updates
/// configured services.
#[derive(Parser, Debug)]
#[command(name = "certdeploy-client", version, about = "CertDeploy client daemon")]
pub struct ClientArgs {
    /// The path to the CertDeploy client config.
    #[arg(long, env = "CERTDEPLOY_CLIENT_CONFIG", default_value = DEFAULT_CLIENT_CONFIG)]
    pub config: PathBuf,

    /// Run the daemon (SFTP server + update coordinator). Without this the
    /// client runs one deploy pass and exits.
    #[arg(long, env = "CERTDEPLOY_CLIENT_DAEMON")]
    pub daemon: bool,

    /// The CertDeploy log level. Defaults to the value in the config file,
    /// or ERROR.
    #[arg(long, env = "CERTDEPLOY_CLIENT_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// The path to the CertDeploy log file. Defaults to stdout.
    #[arg(long, env = "CERTDEPLOY_CLIENT_LOG_FILENAME")]
    pub log_filename: Option<PathBuf>,

    /// The log level for the embedded SFTP server. Defaults to ERROR.
    #[arg(long, env = "CERTDEPOLY_CLIENT_SFTP_LOG_LEVEL")]
    pub sftp_log_level: Option<LogLevel>,

    /// The path to the log file for the embedded SFTP server.
    #[arg(long, env = "CERTDEPOLY_CLIENT_SFTP_LOG_FILENAME")]
    pub sftp_log_filename: Option<PathBuf>,
}

impl clap::ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_list_splits_on_whitespace() {
        let args = ServerArgs::parse_from([
            "certdeploy-server",
            "--domains",
            "www.example.com example.com",
        ]);
        assert_eq!(args.domain_list(), vec!["www.example.com", "example.com"]);
    }

    #[test]
    fn server_args_default_config_path() {
        let args = ServerArgs::parse_from(["certdeploy-server"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_SERVER_CONFIG));
    }
}
