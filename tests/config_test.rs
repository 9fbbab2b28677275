//! End-to-end config loading: writes a real `server.yml`/`client.yml` to a
//! temp directory and loads them through the public `ServerConfig`/
//! `ClientConfig` API, the way the daemons do at startup.
use std::fs;

use certdeploy::config::{ClientConfig, PushMode, ServerConfig};

const TEST_PUBKEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEB";

fn write(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn server_config_loads_and_validates_clients() {
    let dir = tempfile::tempdir().unwrap();
    let privkey = write(dir.path(), "server_key", "not a real key, just needs to exist");
    let queue_dir = dir.path().join("queue");
    fs::create_dir(&queue_dir).unwrap();

    let yaml = format!(
        r#"
privkey_filename: {privkey:?}
queue_dir: {queue_dir:?}
renew_exec: /bin/true
push_mode: parallel
push_interval: 5
renew_every: 2
renew_unit: day
client_configs:
  - address: 10.0.0.5
    domains: [example.com, www.example.com]
    pubkey: "{TEST_PUBKEY}"
    username: certdeploy
"#
    );
    let config_path = write(dir.path(), "server.yml", &yaml);

    let config = ServerConfig::load(&config_path).unwrap();
    assert_eq!(config.push_mode, PushMode::Parallel);
    assert_eq!(config.renew_unit, "days");
    assert_eq!(config.clients.len(), 1);
    assert_eq!(config.clients[0].domains, vec!["example.com", "www.example.com"]);
    // The hash is a deterministic function of username+address+port, used to
    // key the push queue.
    assert_eq!(config.clients[0].hash.len(), 40);
}

#[test]
fn server_config_rejects_unknown_renew_unit() {
    let dir = tempfile::tempdir().unwrap();
    let privkey = write(dir.path(), "server_key", "x");
    let queue_dir = dir.path().join("queue");
    fs::create_dir(&queue_dir).unwrap();

    let yaml = format!(
        r#"
privkey_filename: {privkey:?}
queue_dir: {queue_dir:?}
renew_exec: /bin/true
renew_unit: fortnight
client_configs:
  - address: 10.0.0.5
    domains: [example.com]
    pubkey: "{TEST_PUBKEY}"
"#
    );
    let config_path = write(dir.path(), "server.yml", &yaml);
    assert!(ServerConfig::load(&config_path).is_err());
}

#[test]
fn client_config_loads_with_minimal_fields() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    let dest = dir.path().join("dest");
    fs::create_dir(&source).unwrap();
    fs::create_dir(&dest).unwrap();

    let yaml = format!(
        r#"
destination: {dest:?}
source: {source:?}
sftpd:
  server_pubkey: "{TEST_PUBKEY}"
update_delay: 30m
"#
    );
    let config_path = write(dir.path(), "client.yml", &yaml);

    let config = ClientConfig::load(&config_path).unwrap();
    assert_eq!(config.update_delay, std::time::Duration::from_secs(1800));
    assert!(config.services.is_empty());
}

#[test]
fn client_config_requires_a_trusted_server_pubkey() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    let dest = dir.path().join("dest");
    fs::create_dir(&source).unwrap();
    fs::create_dir(&dest).unwrap();

    let yaml = format!(
        r#"
destination: {dest:?}
source: {source:?}
"#
    );
    let config_path = write(dir.path(), "client.yml", &yaml);
    assert!(ClientConfig::load(&config_path).is_err());
}
