//! Remote transfer engine
//!
//! Recursive upload and file-only download over the subchannel of a
//! connected session. Each upload root runs as one task of an outer
//! [`TransferQueue`]; a directory root then creates all of its remote
//! directories through one queue before copying files through another.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::channel::FileChannel;
use super::error::{BatchError, SftpError, TransferTaskError};
use super::path_utils::{join_remote_path, local_basename, remote_basename, unixify};
use super::transfer::TransferQueue;
use super::walker::walk;
use crate::events::{EventSink, SessionEvent};
use crate::ssh::ConnectionRegistry;

pub struct RemoteTransferEngine {
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn EventSink>,
    concurrency: usize,
}

/// Everything one transfer task needs, cheap to clone into tasks
#[derive(Clone)]
struct TransferContext {
    session_uid: String,
    files: Arc<dyn FileChannel>,
    sink: Arc<dyn EventSink>,
    concurrency: usize,
}

impl RemoteTransferEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sink: Arc<dyn EventSink>,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            sink,
            concurrency,
        }
    }

    fn context(&self, session_uid: &str) -> Result<TransferContext, SftpError> {
        let files = self
            .registry
            .files(session_uid)
            .ok_or_else(|| SftpError::NotConnected(session_uid.to_string()))?;
        Ok(TransferContext {
            session_uid: session_uid.to_string(),
            files,
            sink: self.sink.clone(),
            concurrency: self.concurrency,
        })
    }

    /// Upload files and directory trees into `remote_dir`.
    ///
    /// Independent roots upload in parallel. Every root is drained even when
    /// another fails; the combined failures are returned as one batch error.
    pub async fn upload(
        &self,
        session_uid: &str,
        local_paths: &[PathBuf],
        remote_dir: &str,
    ) -> Result<(), SftpError> {
        let ctx = self.context(session_uid)?;
        let remote_dir = unixify(remote_dir);
        info!(
            "Uploading {} path(s) to {} on session {}",
            local_paths.len(),
            remote_dir,
            session_uid
        );

        let roots = TransferQueue::new(self.concurrency);
        for local in local_paths {
            let ctx = ctx.clone();
            let local = local.clone();
            let remote_dir = remote_dir.clone();
            roots.add(format!("upload {}", local.display()), async move {
                ctx.upload_root(&local, &remote_dir).await
            });
        }

        let settled = roots.wait_until_idle().await.map_err(flatten_batch)?;
        info!("Upload finished on session {} ({} root(s))", session_uid, settled);
        Ok(())
    }

    /// Download remote files into `local_dir`, keeping their basenames.
    /// Remote directories are not recursed into.
    pub async fn download(
        &self,
        session_uid: &str,
        remote_paths: &[String],
        local_dir: &Path,
    ) -> Result<(), SftpError> {
        let ctx = self.context(session_uid)?;
        info!(
            "Downloading {} path(s) to {:?} on session {}",
            remote_paths.len(),
            local_dir,
            session_uid
        );

        let queue = TransferQueue::new(self.concurrency);
        for remote in remote_paths {
            let ctx = ctx.clone();
            let remote = unixify(remote);
            let local_dir = local_dir.to_path_buf();
            queue.add(format!("get {}", remote), async move {
                let name = remote_basename(&remote);
                if name.is_empty() {
                    return Err(SftpError::NotADirectory(format!(
                        "{} has no file name to download to",
                        remote
                    )));
                }
                let local = local_dir.join(name);
                ctx.get_file(&remote, &local).await
            });
        }

        queue.wait_until_idle().await.map_err(flatten_batch)?;
        Ok(())
    }
}

impl TransferContext {
    async fn upload_root(&self, local: &Path, remote_dir: &str) -> Result<(), SftpError> {
        let metadata = tokio::fs::metadata(local).await?;

        if !metadata.is_dir() {
            let name = local_basename(local).ok_or_else(|| {
                SftpError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("path has no file name: {}", local.display()),
                ))
            })?;
            return self.put_file(local, &join_remote_path(remote_dir, &name)).await;
        }

        let mut paths = walk(local, remote_dir).await?;
        paths.sort_directories();
        if paths.is_empty() {
            return Ok(());
        }

        debug!(
            "Upload of {:?}: {} directories, {} files",
            local,
            paths.directories.len(),
            paths.files.len()
        );

        let dirs = TransferQueue::new(self.concurrency);
        for dir in paths.directories {
            let files = self.files.clone();
            dirs.add(format!("mkdir {}", dir), async move {
                mkdir_idempotent(files.as_ref(), &dir).await
            });
        }
        dirs.wait_until_idle().await?;

        let puts = TransferQueue::new(self.concurrency);
        for file in paths.files {
            let ctx = self.clone();
            puts.add(format!("put {}", file.relative), async move {
                ctx.put_file(&file.local, &file.relative).await
            });
        }
        puts.wait_until_idle().await?;
        Ok(())
    }

    async fn put_file(&self, local: &Path, remote: &str) -> Result<(), SftpError> {
        let local_path = local.to_string_lossy().into_owned();
        let progress = |transferred: u64, total: u64| {
            self.sink.emit(SessionEvent::UploadProgress {
                session_uid: self.session_uid.clone(),
                transferred,
                total,
                path: remote.to_string(),
                local_path: local_path.clone(),
            });
        };

        let bytes = self.files.put(local, remote, &progress).await?;
        debug!("Uploaded {:?} -> {} ({} bytes)", local, remote, bytes);
        Ok(())
    }

    async fn get_file(&self, remote: &str, local: &Path) -> Result<(), SftpError> {
        let local_path = local.to_string_lossy().into_owned();
        let progress = |transferred: u64, total: u64| {
            self.sink.emit(SessionEvent::DownloadProgress {
                session_uid: self.session_uid.clone(),
                transferred,
                total,
                path: remote.to_string(),
                local_path: local_path.clone(),
            });
        };

        let bytes = self.files.get(remote, local, &progress).await?;
        debug!("Downloaded {} -> {:?} ({} bytes)", remote, local, bytes);
        Ok(())
    }
}

/// Create a remote directory unless a directory already exists there.
///
/// An existing non-directory is a [`SftpError::MkdirConflict`].
pub async fn mkdir_idempotent(files: &dyn FileChannel, path: &str) -> Result<(), SftpError> {
    let path = unixify(path);
    match files.stat(&path).await {
        Ok(stat) if stat.is_dir() => {
            debug!("Remote directory already exists: {}", path);
            return Ok(());
        }
        Ok(_) => return Err(SftpError::MkdirConflict(path)),
        Err(_) => {}
    }

    match files.mkdir(&path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            // Lost a race against another task creating the same directory
            match files.stat(&path).await {
                Ok(stat) if stat.is_dir() => Ok(()),
                _ => {
                    warn!("mkdir {} failed: {}", path, e);
                    Err(e)
                }
            }
        }
    }
}

/// Replace per-root batch failures with the task failures inside them
fn flatten_batch(err: SftpError) -> SftpError {
    let SftpError::Batch(batch) = err else {
        return err;
    };

    let mut settled = batch.settled;
    let mut failures = Vec::with_capacity(batch.failures.len());
    for TransferTaskError { label, source } in batch.failures {
        match source {
            SftpError::Batch(inner) => {
                settled = settled.saturating_sub(1) + inner.settled;
                failures.extend(inner.failures);
            }
            source => failures.push(TransferTaskError { label, source }),
        }
    }
    SftpError::Batch(BatchError { failures, settled })
}
