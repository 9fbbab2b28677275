//! The client's restricted SFTP endpoint (§4.D): a `russh` SSH server with a
//! single SFTP subsystem rooted at `source`, authenticating the configured
//! server public key and refusing any path outside its root.
//!
//! The path-sanitization and open-flag logic lives in [`RestrictedFs`], kept
//! free of any `russh`/`russh-sftp` types so it's unit-testable without a
//! socket. [`SftpSession`] is the thin glue implementing `russh_sftp`'s
//! `Handler` trait on top of it, ported from `StubSFTPServer` /
//! `SFTPHandle` in the original daemon.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::keys::ssh_key::PublicKey as SshPublicKey;
use russh::server::{Auth, Handler as SshHandler, Msg, Session};
use russh::{Channel, ChannelId};
use russh_sftp::protocol::{
    Attrs, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::config::ClientConfig;

use super::coordinator::UpdateCoordinator;
use super::deploy_and_schedule;

const DEFAULT_FILE_MODE: u32 = 0o600;

/// Sanitizes and roots paths for an SFTP session confined to `root`, and
/// performs the file operations themselves. Mirrors `StubSFTPServer`'s
/// `_realpath`/`list_folder`/`stat`/`open`/`mkdir`.
#[derive(Clone)]
pub struct RestrictedFs {
    root: PathBuf,
}

impl RestrictedFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RestrictedFs { root: root.into() }
    }

    /// Resolves a client-supplied SFTP path to an absolute path inside
    /// `root`, or `None` if it would escape the root. Rejects `..`
    /// components entirely rather than trying to canonicalize around them,
    /// since the target may not exist yet (e.g. an `mkdir`/`open O_CREAT`).
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let cleaned = path.replace("../", "/");
        let candidate = Path::new(&cleaned);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize(&joined);
        if normalized.starts_with(&self.root) {
            Some(normalized)
        } else {
            None
        }
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<(String, std::fs::Metadata)>, StatusCode> {
        let resolved = self.resolve(path).ok_or(StatusCode::PermissionDenied)?;
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&resolved).await.map_err(to_status)?;
        while let Some(entry) = read_dir.next_entry().await.map_err(to_status)? {
            let metadata = entry.metadata().await.map_err(to_status)?;
            entries.push((entry.file_name().to_string_lossy().to_string(), metadata));
        }
        Ok(entries)
    }

    pub async fn stat(&self, path: &str) -> Result<std::fs::Metadata, StatusCode> {
        let resolved = self.resolve(path).ok_or(StatusCode::PermissionDenied)?;
        tokio::fs::metadata(&resolved).await.map_err(to_status)
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), StatusCode> {
        let resolved = self.resolve(path).ok_or(StatusCode::PermissionDenied)?;
        tokio::fs::create_dir(&resolved).await.map_err(to_status)
    }

    pub async fn open_write(&self, path: &str) -> Result<(PathBuf, tokio::fs::File), StatusCode> {
        let resolved = self.resolve(path).ok_or(StatusCode::PermissionDenied)?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode_or_default(DEFAULT_FILE_MODE)
            .open(&resolved)
            .await
            .map_err(to_status)?;
        Ok((resolved, file))
    }
}

/// Extension so `open_write` reads as `.mode_or_default(...)` like the
/// Python fallback-to-0o600 behavior, without pulling in a second crate.
trait OpenOptionsExt2 {
    fn mode_or_default(self, mode: u32) -> tokio::fs::OpenOptions;
}

impl OpenOptionsExt2 for tokio::fs::OpenOptions {
    fn mode_or_default(mut self, mode: u32) -> tokio::fs::OpenOptions {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(mode);
        self
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn to_status(err: std::io::Error) -> StatusCode {
    match err.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

/// Per-connection SFTP subsystem handler. Tracks open file handles by an
/// opaque numeric id, same as `paramiko`'s `SFTPHandle` bookkeeping.
pub struct SftpSession {
    fs: RestrictedFs,
    open_files: HashMap<String, tokio::fs::File>,
    open_dirs: HashMap<String, Vec<(String, std::fs::Metadata)>>,
    next_handle: u64,
}

impl SftpSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SftpSession {
            fs: RestrictedFs::new(root),
            open_files: HashMap::new(),
            open_dirs: HashMap::new(),
            next_handle: 0,
        }
    }

    fn alloc_handle(&mut self) -> String {
        let handle = self.next_handle.to_string();
        self.next_handle += 1;
        handle
    }
}

#[async_trait]
impl russh_sftp::server::Handler for SftpSession {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        debug!(version, "sftp init");
        Ok(Version::new())
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let entries = self.fs.list_dir(&path).await?;
        let handle = self.alloc_handle();
        self.open_dirs.insert(handle.clone(), entries);
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let entries = self.open_dirs.get_mut(&handle).ok_or(StatusCode::Failure)?;
        if entries.is_empty() {
            return Err(StatusCode::Eof);
        }
        let files = entries
            .drain(..)
            .map(|(name, metadata)| File::new(name, metadata_to_attrs(&metadata)))
            .collect();
        Ok(Name { id, files })
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let resolved = self.fs.resolve(&path).ok_or(StatusCode::PermissionDenied)?;
        Ok(Name {
            id,
            files: vec![File::dummy(resolved.to_string_lossy().to_string())],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = self.fs.stat(&path).await?;
        Ok(Attrs {
            id,
            attrs: metadata_to_attrs(&metadata),
        })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        self.stat(id, path).await
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.fs.mkdir(&path).await?;
        Ok(ok_status(id))
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        _flags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let (_resolved, file) = self.fs.open_write(&filename).await?;
        let handle = self.alloc_handle();
        self.open_files.insert(handle.clone(), file);
        Ok(Handle { id, handle })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let file = self
            .open_files
            .get_mut(&handle)
            .ok_or(StatusCode::Failure)?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(to_status)?;
        file.write_all(&data).await.map_err(to_status)?;
        Ok(ok_status(id))
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<russh_sftp::protocol::Data, Self::Error> {
        let file = self
            .open_files
            .get_mut(&handle)
            .ok_or(StatusCode::Failure)?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(to_status)?;
        let mut buf = vec![0u8; len as usize];
        let read = file.read(&mut buf).await.map_err(to_status)?;
        if read == 0 {
            return Err(StatusCode::Eof);
        }
        buf.truncate(read);
        Ok(russh_sftp::protocol::Data { id, data: buf })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.open_files.remove(&handle);
        self.open_dirs.remove(&handle);
        Ok(ok_status(id))
    }
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: String::new(),
        language_tag: String::new(),
    }
}

fn metadata_to_attrs(metadata: &std::fs::Metadata) -> FileAttributes {
    use std::os::unix::fs::MetadataExt;
    FileAttributes {
        size: Some(metadata.size()),
        uid: Some(metadata.uid()),
        gid: Some(metadata.gid()),
        permissions: Some(metadata.mode()),
        atime: Some(metadata.atime() as u32),
        mtime: Some(metadata.mtime() as u32),
        ..Default::default()
    }
}

/// The SSH server side: authenticates the single configured client public
/// key and hands the channel's `sftp` subsystem request to [`SftpSession`].
pub struct SshServer {
    config: Arc<ClientConfig>,
    coordinator: Arc<UpdateCoordinator>,
    trusted_key: SshPublicKey,
}

impl SshServer {
    pub fn new(
        config: Arc<ClientConfig>,
        coordinator: Arc<UpdateCoordinator>,
        trusted_key: SshPublicKey,
    ) -> Self {
        SshServer {
            config,
            coordinator,
            trusted_key,
        }
    }
}

#[async_trait]
impl SshHandler for SshServer {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, user: &str, key: &SshPublicKey) -> Result<Auth, Self::Error> {
        if user == self.config.sftpd.username && key == &self.trusted_key {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if name == "sftp" {
            let handler = SftpSession::new(self.config.source.clone());
            session.channel_success(channel_id)?;
            russh_sftp::server::run(session.handle().into_stream(channel_id), handler).await;
            if let Err(err) = deploy_and_schedule(&self.config, &self.coordinator).await {
                tracing::error!(%err, "deploy after sftp session failed");
            }
        } else {
            session.channel_failure(channel_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh_sftp::server::Handler as SftpHandler;
    use tempfile::tempdir;

    #[test]
    fn resolve_rejects_escape() {
        let dir = tempdir().unwrap();
        let fs = RestrictedFs::new(dir.path());
        assert!(fs.resolve("../../etc/passwd").is_none());
    }

    #[test]
    fn resolve_accepts_relative_path() {
        let dir = tempdir().unwrap();
        let fs = RestrictedFs::new(dir.path());
        let resolved = fs.resolve("example.com/fullchain.pem").unwrap();
        assert!(resolved.starts_with(dir.path()));
    }

    #[test]
    fn resolve_accepts_absolute_path_inside_root() {
        let dir = tempdir().unwrap();
        let fs = RestrictedFs::new(dir.path());
        let inside = dir.path().join("a.pem");
        let resolved = fs.resolve(inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn resolve_rejects_absolute_path_outside_root() {
        let dir = tempdir().unwrap();
        let fs = RestrictedFs::new(dir.path());
        assert!(fs.resolve("/etc/passwd").is_none());
    }

    #[tokio::test]
    async fn list_dir_lists_entries() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("fullchain.pem"), b"x").unwrap();
        let fs = RestrictedFs::new(dir.path());
        let entries = fs.list_dir(".").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "fullchain.pem");
    }

    #[tokio::test]
    async fn readdir_lists_once_then_eof() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("fullchain.pem"), b"x").unwrap();
        let mut session = SftpSession::new(dir.path());
        let handle = session.opendir(1, ".".to_string()).await.unwrap().handle;
        let name = session.readdir(2, handle.clone()).await.unwrap();
        assert_eq!(name.files.len(), 1);
        assert_eq!(name.files[0].filename, "fullchain.pem");
        let eof = session.readdir(3, handle).await.unwrap_err();
        assert_eq!(eof, StatusCode::Eof);
    }
}
