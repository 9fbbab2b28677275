//! # CertDeploy
//!
//! Distributes renewed X.509 certificate lineages from a central server to
//! downstream clients over authenticated SFTP, then triggers the configured
//! service reloads on each client.
//!
//! The server watches for certbot renewals, matches the renewed lineage's
//! domains against configured clients, and pushes the needed files out over
//! SSH/SFTP. Each client runs an embedded SFTP server that stages incoming
//! files, validates and promotes them, and restarts or reloads whatever
//! services (containers, orchestrator services, systemd/rc units, or a
//! script) are configured to use them.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod lineage;
pub mod logging;
pub mod server;
pub mod types;
pub mod updater;

pub use config::{ClientConfig, ServerConfig};
pub use error::{CertDeployError, Result};
pub use types::Lineage;
