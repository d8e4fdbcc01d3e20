//! SFTP Session management
//!
//! [`FileChannel`] implementation over russh-sftp, opened on a session
//! channel of an existing SSH connection.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use russh_sftp::client::fs::Metadata;
use russh_sftp::client::SftpSession as RusshSftpSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::channel::{FileChannel, ProgressFn, RemoteDirEntry, RemoteStat};
use super::error::SftpError;
use super::types::FileKind;
use crate::ssh::HandleController;

/// 64 KB chunks
const CHUNK_SIZE: usize = 65536;

/// Bound on a single remote read or write
const SFTP_IO_TIMEOUT: Duration = Duration::from_secs(300);

/// SFTP Session wrapper
pub struct SftpSession {
    sftp: RusshSftpSession,
    session_uid: String,
}

impl SftpSession {
    /// Open the SFTP subsystem on a fresh session channel
    pub async fn open(
        controller: &HandleController,
        session_uid: String,
    ) -> Result<Self, SftpError> {
        info!("Opening SFTP subsystem for session {}", session_uid);

        let channel = controller
            .open_session_channel()
            .await
            .map_err(|e| SftpError::ChannelError(e.to_string()))?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            SftpError::ChannelError(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SftpError::ChannelError(e.to_string()))?;

        info!("SFTP subsystem opened for session {}", session_uid);

        Ok(Self { sftp, session_uid })
    }
}

fn remote_stat(metadata: &Metadata) -> RemoteStat {
    RemoteStat {
        kind: metadata
            .permissions
            .map(FileKind::from_mode)
            .unwrap_or(FileKind::Unknown),
        size: metadata.size.unwrap_or(0),
        permissions: metadata.permissions,
        mtime: metadata.mtime,
        atime: metadata.atime,
    }
}

fn timed_out(what: &str, path: &str, transferred: u64) -> SftpError {
    warn!(
        "SFTP {} timeout after {:?} on {} at {} bytes",
        what, SFTP_IO_TIMEOUT, path, transferred
    );
    SftpError::ChannelError(format!(
        "{} timeout after {:?} - SSH connection may be dead",
        what, SFTP_IO_TIMEOUT
    ))
}

#[async_trait]
impl FileChannel for SftpSession {
    async fn stat(&self, path: &str) -> Result<RemoteStat, SftpError> {
        let metadata = self
            .sftp
            .metadata(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))?;
        Ok(remote_stat(&metadata))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, SftpError> {
        debug!("Listing directory: {}", path);

        let read_dir = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))?;

        let entries = read_dir
            .filter_map(|entry| {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    return None;
                }
                Some(RemoteDirEntry {
                    stat: remote_stat(&entry.metadata()),
                    name,
                })
            })
            .collect::<Vec<_>>();

        debug!("Listed {} entries in {}", entries.len(), path);
        Ok(entries)
    }

    async fn mkdir(&self, path: &str) -> Result<(), SftpError> {
        debug!("Creating directory: {}", path);
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))
    }

    async fn put(
        &self,
        local: &Path,
        remote: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, SftpError> {
        let mut local_file = tokio::fs::File::open(local).await?;
        let total = local_file.metadata().await?.len();

        debug!("Uploading {:?} -> {} ({} bytes)", local, remote, total);

        let mut remote_file = self
            .sftp
            .create(remote)
            .await
            .map_err(|e| SftpError::from_remote(e, remote))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut transferred = 0u64;

        loop {
            let bytes_read = local_file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }

            match tokio::time::timeout(
                SFTP_IO_TIMEOUT,
                remote_file.write_all(&buffer[..bytes_read]),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(SftpError::ProtocolError(e.to_string())),
                Err(_) => return Err(timed_out("write", remote, transferred)),
            }

            transferred += bytes_read as u64;
            progress(transferred, total);
        }

        if transferred == 0 {
            progress(0, total);
        }

        remote_file
            .shutdown()
            .await
            .map_err(|e| SftpError::ProtocolError(e.to_string()))?;

        Ok(transferred)
    }

    async fn get(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<u64, SftpError> {
        let total = self.stat(remote).await?.size;

        debug!("Downloading {} -> {:?} ({} bytes)", remote, local, total);

        let mut remote_file = self
            .sftp
            .open(remote)
            .await
            .map_err(|e| SftpError::from_remote(e, remote))?;
        let mut local_file = tokio::fs::File::create(local).await?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut transferred = 0u64;

        loop {
            let bytes_read =
                match tokio::time::timeout(SFTP_IO_TIMEOUT, remote_file.read(&mut buffer)).await {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(SftpError::ProtocolError(e.to_string())),
                    Err(_) => return Err(timed_out("read", remote, transferred)),
                };

            if bytes_read == 0 {
                break;
            }

            local_file.write_all(&buffer[..bytes_read]).await?;
            transferred += bytes_read as u64;
            progress(transferred, total);
        }

        if transferred == 0 {
            progress(0, total);
        }

        local_file.flush().await?;
        Ok(transferred)
    }

    async fn unlink(&self, path: &str) -> Result<(), SftpError> {
        debug!("Deleting: {}", path);
        self.sftp
            .remove_file(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        debug!("Renaming {} to {}", from, to);
        self.sftp
            .rename(from, to)
            .await
            .map_err(|e| SftpError::from_remote(e, from))
    }

    async fn realpath(&self, path: &str) -> Result<String, SftpError> {
        self.sftp
            .canonicalize(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))
    }

    async fn close(&self) {
        if let Err(e) = self.sftp.close().await {
            debug!("SFTP close for session {} failed: {}", self.session_uid, e);
        }
    }
}
