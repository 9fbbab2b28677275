//! End-to-end promotion: stages a lineage under `source`, deploys it, and
//! checks it lands under `destination` with the configured permissions.
use std::fs;
use std::os::unix::fs::PermissionsExt;

use certdeploy::client::deploy::deploy;
use certdeploy::config::{ClientConfig, LogLevel, Permissions, SftpdConfig};

const FULLCHAIN: &str = "-----BEGIN CERTIFICATE-----\n\
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA1Q==\n\
-----END CERTIFICATE-----\n";

fn config(source: std::path::PathBuf, destination: std::path::PathBuf) -> ClientConfig {
    ClientConfig {
        destination,
        source,
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
        update_delay: std::time::Duration::ZERO,
        fail_fast: false,
        permissions: Permissions {
            mode: Some(0o640),
            directory_mode: Some(0o750),
            ..Permissions::default()
        },
        log_level: LogLevel::default(),
        log_filename: None,
    }
}

#[test]
fn deploy_promotes_lineage_and_applies_permissions() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    let lineage_dir = source.path().join("example.com");
    fs::create_dir(&lineage_dir).unwrap();
    fs::write(lineage_dir.join("fullchain.pem"), FULLCHAIN).unwrap();

    let config = config(source.path().to_path_buf(), destination.path().to_path_buf());
    let updated = deploy(&config).unwrap();
    assert!(updated);

    let deployed = destination.path().join("example.com/fullchain.pem");
    assert!(deployed.exists());
    let mode = fs::metadata(&deployed).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o640);

    let dir_mode = fs::metadata(destination.path().join("example.com"))
        .unwrap()
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(dir_mode, 0o750);
}

#[test]
fn deploy_rejects_malformed_pem() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    let lineage_dir = source.path().join("example.com");
    fs::create_dir(&lineage_dir).unwrap();
    fs::write(lineage_dir.join("fullchain.pem"), "not a pem file").unwrap();

    let config = config(source.path().to_path_buf(), destination.path().to_path_buf());
    assert!(deploy(&config).is_err());
}
