//! File-transfer subchannel abstraction
//!
//! The engine and [`RemoteFs`](super::remote_fs::RemoteFs) talk to the remote
//! filesystem only through [`FileChannel`]. The russh-sftp implementation
//! lives in [`super::session`].

use std::path::Path;

use async_trait::async_trait;

use super::error::SftpError;
use super::types::{FileInfo, FileKind};

/// Progress callback: `(bytes_transferred_so_far, total_bytes)`
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Attributes of one remote path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    pub kind: FileKind,
    pub size: u64,
    /// Full mode bits when the server sent them
    pub permissions: Option<u32>,
    pub mtime: Option<u32>,
    pub atime: Option<u32>,
}

impl RemoteStat {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn into_file_info(self, name: String, path: String) -> FileInfo {
        FileInfo::new(
            name,
            path,
            self.kind,
            self.permissions,
            self.size,
            self.mtime.map(i64::from),
            self.atime.map(i64::from),
        )
    }
}

/// One entry returned by [`FileChannel::read_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    pub name: String,
    pub stat: RemoteStat,
}

/// Remote filesystem primitives of a connected session.
///
/// Implementations multiplex concurrent calls internally; callers share one
/// instance across all tasks of a session.
#[async_trait]
pub trait FileChannel: Send + Sync {
    async fn stat(&self, path: &str) -> Result<RemoteStat, SftpError>;

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, SftpError>;

    async fn mkdir(&self, path: &str) -> Result<(), SftpError>;

    /// Copy a local file to `remote`, returning the bytes written
    async fn put(
        &self,
        local: &Path,
        remote: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, SftpError>;

    /// Copy `remote` to a local file, returning the bytes written
    async fn get(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<u64, SftpError>;

    async fn unlink(&self, path: &str) -> Result<(), SftpError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError>;

    async fn realpath(&self, path: &str) -> Result<String, SftpError>;

    /// Close the subchannel. Later calls fail.
    async fn close(&self);
}
