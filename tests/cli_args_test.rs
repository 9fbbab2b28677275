//! Exercises `ServerArgs`/`ClientArgs` the way the binaries parse real argv,
//! including the env-var fallbacks the original hook scripts rely on.
use clap::Parser;

use certdeploy::cli::{ClientArgs, ServerArgs};

#[test]
fn server_args_prefers_flags_over_defaults() {
    let args = ServerArgs::parse_from([
        "certdeploy-server",
        "--config",
        "/etc/certdeploy/server.yml",
        "--daemon",
    ]);
    assert!(args.daemon);
    assert!(!args.push);
    assert!(!args.renew);
    assert_eq!(args.domain_list(), Vec::<String>::new());
}

#[test]
fn server_args_push_mode_with_lineage_and_domains() {
    let args = ServerArgs::parse_from([
        "certdeploy-server",
        "--lineage",
        "/etc/letsencrypt/live/example.com",
        "--domains",
        "example.com www.example.com",
        "--push",
    ]);
    assert!(args.push);
    assert_eq!(args.lineage.as_deref(), Some("/etc/letsencrypt/live/example.com"));
    assert_eq!(args.domain_list(), vec!["example.com", "www.example.com"]);
}

#[test]
fn client_args_defaults_to_one_shot_deploy() {
    let args = ClientArgs::parse_from(["certdeploy-client"]);
    assert!(!args.daemon);
    assert!(args.log_level.is_none());
}
