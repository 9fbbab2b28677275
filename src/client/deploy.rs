//! Promotes validated lineages from `source` into `destination` (§4.B/E).
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::client::{OwnerRef, Permissions};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::lineage::validate_lineage;
use crate::types::lineages_in;

/// Moves every `*.pem` file from a staged lineage into the matching
/// destination directory, applying configured permissions. Returns `true` if
/// anything was actually moved (i.e. an update is now due).
pub fn deploy(config: &ClientConfig) -> Result<bool> {
    debug!("deploying");
    let lineages = lineages_in(&config.source)?;
    if lineages.is_empty() {
        debug!(source = %config.source.display(), "source directory is empty");
        return Ok(false);
    }
    let mut updated = false;
    for lineage in lineages {
        validate_lineage(&lineage.path)?;
        let dest_dir = config.destination.join(&lineage.name);
        std::fs::create_dir_all(&dest_dir)?;
        set_permissions(
            &dest_dir,
            config.permissions.directory_mode,
            config.permissions.owner.as_ref(),
            config.permissions.group.as_ref(),
        )?;
        for entry in std::fs::read_dir(&lineage.path)? {
            let entry = entry?;
            let source_path = entry.path();
            if source_path.extension().and_then(|e| e.to_str()) != Some("pem") {
                continue;
            }
            let dest_path = dest_dir.join(entry.file_name());
            if !needs_update(&source_path, &dest_path)? {
                debug!(from = %source_path.display(), to = %dest_path.display(), "unchanged, skipping");
                continue;
            }
            updated = true;
            std::fs::rename(&source_path, &dest_path)?;
            set_permissions(
                &dest_path,
                config.permissions.mode,
                config.permissions.owner.as_ref(),
                config.permissions.group.as_ref(),
            )?;
            debug!(from = %source_path.display(), to = %dest_path.display(), "moved");
        }
    }
    Ok(updated)
}

fn needs_update(source: &Path, dest: &Path) -> Result<bool> {
    if !dest.exists() {
        return Ok(true);
    }
    let source_bytes = std::fs::read(source)?;
    let dest_bytes = std::fs::read(dest)?;
    Ok(source_bytes != dest_bytes)
}

fn set_permissions(
    path: &Path,
    mode: Option<u32>,
    owner: Option<&OwnerRef>,
    group: Option<&OwnerRef>,
) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    if owner.is_some() || group.is_some() {
        chown(path, owner, group)?;
    }
    Ok(())
}

fn chown(path: &Path, owner: Option<&OwnerRef>, group: Option<&OwnerRef>) -> Result<()> {
    let uid = owner.map(resolve_uid).transpose()?;
    let gid = group.map(resolve_gid).transpose()?;
    nix::unistd::chown(path, uid, gid)
        .map_err(|err| crate::error::CertDeployError::other(format!("chown {}: {err}", path.display())))
}

fn resolve_uid(owner: &OwnerRef) -> Result<nix::unistd::Uid> {
    match owner {
        OwnerRef::Id(id) => Ok(nix::unistd::Uid::from_raw(*id)),
        OwnerRef::Name(name) => nix::unistd::User::from_name(name)
            .map_err(|err| crate::error::CertDeployError::other(err.to_string()))?
            .map(|u| u.uid)
            .ok_or_else(|| crate::error::CertDeployError::other(format!("no such user: {name}"))),
    }
}

fn resolve_gid(group: &OwnerRef) -> Result<nix::unistd::Gid> {
    match group {
        OwnerRef::Id(id) => Ok(nix::unistd::Gid::from_raw(*id)),
        OwnerRef::Name(name) => nix::unistd::Group::from_name(name)
            .map_err(|err| crate::error::CertDeployError::other(err.to_string()))?
            .map(|g| g.gid)
            .ok_or_else(|| crate::error::CertDeployError::other(format!("no such group: {name}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const CERT: &str = "-----BEGIN CERTIFICATE-----\nMIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAwsxzewZi4PhQsZJQEb5+\n-----END CERTIFICATE-----\n";

    fn write_file(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::File::create(path).unwrap().write_all(content.as_bytes()).unwrap();
    }

    fn base_config(source: PathBuf, destination: PathBuf) -> ClientConfig {
        use crate::config::client::SftpdConfig;
        use crate::config::LogLevel;
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
            permissions: Permissions::default(),
            log_level: LogLevel::default(),
            log_filename: None,
        }
    }

    #[test]
    fn deploy_moves_new_lineage() {
        let source = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write_file(&source.path().join("example.com/fullchain.pem"), CERT);
        let config = base_config(source.path().to_path_buf(), destination.path().to_path_buf());
        let updated = deploy(&config).unwrap();
        assert!(updated);
        assert!(destination.path().join("example.com/fullchain.pem").exists());
    }

    #[test]
    fn deploy_is_noop_on_unchanged_content() {
        let source = tempdir().unwrap();
        let destination = tempdir().unwrap();
        write_file(&destination.path().join("example.com/fullchain.pem"), CERT);
        write_file(&source.path().join("example.com/fullchain.pem"), CERT);
        let config = base_config(source.path().to_path_buf(), destination.path().to_path_buf());
        let updated = deploy(&config).unwrap();
        assert!(!updated);
    }

    #[test]
    fn deploy_empty_source_is_noop() {
        let source = tempdir().unwrap();
        let destination = tempdir().unwrap();
        let config = base_config(source.path().to_path_buf(), destination.path().to_path_buf());
        assert!(!deploy(&config).unwrap());
    }
}
