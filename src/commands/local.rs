//! Local filesystem commands

use std::path::Path;

use crate::local::{fs, LocalFsError};
use crate::sftp::FileInfo;

pub async fn local_list(path: &Path) -> Result<Vec<FileInfo>, LocalFsError> {
    fs::list_dir(path).await
}

/// Get detailed file metadata
pub async fn local_info(path: &Path) -> Result<FileInfo, LocalFsError> {
    fs::file_info(path).await
}

pub async fn local_read(path: &Path) -> Result<String, LocalFsError> {
    fs::read_to_string(path).await
}

pub async fn local_write(path: &Path, contents: &str) -> Result<(), LocalFsError> {
    fs::write_string(path, contents).await
}

pub async fn local_move(source: &Path, destination: &Path) -> Result<(), LocalFsError> {
    fs::rename(source, destination).await
}

pub async fn local_delete(path: &Path) -> Result<(), LocalFsError> {
    fs::remove_file(path).await
}

pub async fn local_mkdir(path: &Path) -> Result<(), LocalFsError> {
    fs::create_dir(path).await
}

pub async fn local_exists(path: &Path) -> bool {
    fs::exists(path).await
}

/// Home directory of the local user
pub fn local_home_dir() -> Result<String, LocalFsError> {
    Ok(fs::home_dir()?.display().to_string())
}
