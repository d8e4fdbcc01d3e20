//! Remote file commands
//!
//! Thin wrappers over [`RemoteFs`](crate::sftp::RemoteFs) and the transfer
//! engine. Every command fails with `NotConnected` when the session has no
//! live connection.

use std::path::{Path, PathBuf};

use crate::sftp::{FileInfo, LongListingEntry, SftpError};
use crate::state::AppState;

/// List directory contents
pub async fn list_files(
    state: &AppState,
    session_uid: &str,
    path: &str,
) -> Result<Vec<FileInfo>, SftpError> {
    state.remote_fs.list_files(session_uid, path).await
}

/// Parsed `ls -l` output
pub async fn list_long(
    state: &AppState,
    session_uid: &str,
    path: &str,
) -> Result<Vec<LongListingEntry>, SftpError> {
    state.remote_fs.list_long(session_uid, path).await
}

pub async fn read_file(state: &AppState, session_uid: &str, path: &str) -> Result<String, SftpError> {
    state.remote_fs.read_file(session_uid, path).await
}

/// Upload files and directories into `remote_dir`
pub async fn upload(
    state: &AppState,
    session_uid: &str,
    local_paths: &[PathBuf],
    remote_dir: &str,
) -> Result<(), SftpError> {
    state
        .transfers
        .upload(session_uid, local_paths, remote_dir)
        .await
}

/// Download remote files into `local_dir`
pub async fn download(
    state: &AppState,
    session_uid: &str,
    remote_paths: &[String],
    local_dir: &Path,
) -> Result<(), SftpError> {
    state
        .transfers
        .download(session_uid, remote_paths, local_dir)
        .await
}

pub async fn delete_files(
    state: &AppState,
    session_uid: &str,
    paths: &[String],
) -> Result<(), SftpError> {
    state.remote_fs.delete_files(session_uid, paths).await
}

pub async fn move_file(
    state: &AppState,
    session_uid: &str,
    source: &str,
    destination: &str,
) -> Result<(), SftpError> {
    state
        .remote_fs
        .move_file(session_uid, source, destination)
        .await
}

/// Get file/directory info
pub async fn file_info(state: &AppState, session_uid: &str, path: &str) -> Result<FileInfo, SftpError> {
    state.remote_fs.file_info(session_uid, path).await
}

pub async fn home_dir(state: &AppState, session_uid: &str) -> Result<String, SftpError> {
    state.remote_fs.home_dir(session_uid).await
}
