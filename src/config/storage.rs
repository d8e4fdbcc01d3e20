//! Configuration Storage
//!
//! Handles reading/writing configuration files to disk.
//! Config location: ~/.sshdeck on macOS/Linux, %APPDATA%\SshDeck on Windows

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::CoreConfig;

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Get the SshDeck configuration directory
/// Returns %APPDATA%\SshDeck on Windows, ~/.sshdeck on macOS/Linux
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("SshDeck"));
        }
        dirs::home_dir()
            .map(|home| home.join(".sshdeck"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".sshdeck"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// Get the persisted session list path
pub fn sessions_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("sessions.json"))
}

/// Get the settings file path
pub fn settings_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("settings.json"))
}

/// Write `contents` to `path` atomically (temp file + rename).
///
/// Parent directories are created as needed.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await?;
    Ok(())
}

/// Copy `path` next to itself with a timestamped `.backup.` suffix.
pub async fn backup(path: &Path) -> Result<PathBuf, StorageError> {
    let backup_path = path.with_extension(format!(
        "json.backup.{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ));

    if fs::metadata(path).await.is_ok() {
        fs::copy(path, &backup_path).await?;
    }

    Ok(backup_path)
}

/// Load settings from disk.
///
/// A missing file yields defaults. A corrupted file is backed up and
/// defaults are used.
pub async fn load_settings(path: &Path) -> Result<CoreConfig, StorageError> {
    match fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<CoreConfig>(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("Settings file corrupted: {}", e);
                match backup(path).await {
                    Ok(backup_path) => tracing::warn!(
                        "Corrupted settings backed up to {:?}, using defaults",
                        backup_path
                    ),
                    Err(backup_err) => {
                        tracing::error!("Failed to backup corrupted settings: {}", backup_err)
                    }
                }
                Ok(CoreConfig::default())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CoreConfig::default()),
        Err(e) => Err(StorageError::Io(e)),
    }
}
