//! Local filesystem operations
//!
//! Metadata is read with `symlink_metadata`, so links are reported as
//! symlinks rather than as their targets.

use std::fs::{FileType, Metadata};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::fs;
use tracing::{debug, warn};

use crate::sftp::{sort_entries, FileInfo, FileKind};

#[derive(Debug, thiserror::Error)]
pub enum LocalFsError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to determine home directory")]
    NoHomeDir,
}

impl serde::Serialize for LocalFsError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LocalFsError + '_ {
    move |source| LocalFsError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn unix_secs(time: std::io::Result<SystemTime>) -> Option<i64> {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_secs()).ok())
}

fn kind_of(file_type: FileType) -> FileKind {
    if file_type.is_dir() {
        return FileKind::Directory;
    }
    if file_type.is_symlink() {
        return FileKind::Symlink;
    }
    if file_type.is_file() {
        return FileKind::File;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_block_device() {
            return FileKind::BlockDevice;
        }
        if file_type.is_char_device() {
            return FileKind::CharacterDevice;
        }
        if file_type.is_fifo() {
            return FileKind::Fifo;
        }
        if file_type.is_socket() {
            return FileKind::Socket;
        }
    }

    FileKind::Unknown
}

fn mode_of(metadata: &Metadata) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(metadata.permissions().mode())
    }
    #[cfg(not(unix))]
    {
        Some(if metadata.permissions().readonly() { 0o444 } else { 0o666 })
    }
}

fn info_from_metadata(path: &Path, metadata: &Metadata) -> FileInfo {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    FileInfo::new(
        name,
        path.display().to_string(),
        kind_of(metadata.file_type()),
        mode_of(metadata),
        metadata.len(),
        unix_secs(metadata.modified()),
        unix_secs(metadata.created().or_else(|_| metadata.accessed())),
    )
}

pub async fn file_info(path: &Path) -> Result<FileInfo, LocalFsError> {
    let metadata = fs::symlink_metadata(path).await.map_err(io_err(path))?;
    Ok(info_from_metadata(path, &metadata))
}

/// Entries of a directory, directories first. Unreadable entries are skipped.
pub async fn list_dir(path: &Path) -> Result<Vec<FileInfo>, LocalFsError> {
    let mut read_dir = fs::read_dir(path).await.map_err(io_err(path))?;
    let mut entries = Vec::new();

    while let Some(entry) = read_dir.next_entry().await.map_err(io_err(path))? {
        let entry_path = entry.path();
        match fs::symlink_metadata(&entry_path).await {
            Ok(metadata) => entries.push(info_from_metadata(&entry_path, &metadata)),
            Err(e) => warn!("Skipping {:?}: {}", entry_path, e),
        }
    }

    sort_entries(&mut entries);
    debug!("Listed {} local entries in {:?}", entries.len(), path);
    Ok(entries)
}

pub async fn read_to_string(path: &Path) -> Result<String, LocalFsError> {
    fs::read_to_string(path).await.map_err(io_err(path))
}

pub async fn write_string(path: &Path, contents: &str) -> Result<(), LocalFsError> {
    fs::write(path, contents).await.map_err(io_err(path))
}

pub async fn rename(from: &Path, to: &Path) -> Result<(), LocalFsError> {
    fs::rename(from, to).await.map_err(io_err(from))
}

pub async fn remove_file(path: &Path) -> Result<(), LocalFsError> {
    fs::remove_file(path).await.map_err(io_err(path))
}

/// Create one directory; the parent must exist
pub async fn create_dir(path: &Path) -> Result<(), LocalFsError> {
    fs::create_dir(path).await.map_err(io_err(path))
}

pub async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

pub fn home_dir() -> Result<PathBuf, LocalFsError> {
    dirs::home_dir().ok_or(LocalFsError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_dir_sorted() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("b.rs"), "fn b() {}").unwrap();
        std::fs::write(temp.path().join(".hidden"), "").unwrap();
        std::fs::create_dir(temp.path().join("zdir")).unwrap();

        let entries = list_dir(temp.path()).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zdir", ".hidden", "b.rs"]);
        assert_eq!(entries[0].file_type, "directory");
        assert!(entries[1].hidden);
        assert_eq!(entries[2].file_type, "rs");
        assert_eq!(entries[2].size, 9);
        assert!(entries[2].modified.is_some());
    }

    #[tokio::test]
    async fn test_file_lifecycle() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("notes");
        create_dir(&dir).await.unwrap();
        assert!(exists(&dir).await);

        let file = dir.join("todo.txt");
        write_string(&file, "milk").await.unwrap();
        assert_eq!(read_to_string(&file).await.unwrap(), "milk");

        let moved = dir.join("done.txt");
        rename(&file, &moved).await.unwrap();
        assert!(!exists(&file).await);

        let info = file_info(&moved).await.unwrap();
        assert_eq!(info.name, "done.txt");
        assert!(info.is_file);

        remove_file(&moved).await.unwrap();
        assert!(!exists(&moved).await);
    }

    #[tokio::test]
    async fn test_errors_name_the_path() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("missing.txt");
        let err = read_to_string(&missing).await.unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_reported_as_link() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("target");
        std::fs::create_dir(&target).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let info = file_info(&link).await.unwrap();
        assert!(info.is_symlink);
        assert_eq!(info.file_type, "symlink");
    }
}
