//! Local directory walker
//!
//! Expands a local path into the remote directories to create and the files
//! to copy, all rooted under a destination prefix.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::error::SftpError;
use super::path_utils::{join_remote_path, local_basename};

/// A local file and where it lands, relative to the destination root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub local: PathBuf,
    pub relative: String,
}

/// Result of walking one local path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    /// Directories in depth-first discovery order
    pub directories: Vec<String>,
    pub files: Vec<WalkedFile>,
}

impl PathSet {
    /// Order directories shortest-first so parents precede children.
    /// Stable, so equal lengths keep discovery order.
    pub fn sort_directories(&mut self) {
        self.directories.sort_by_key(|d| d.len());
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }
}

/// Default filter: skip hidden entries
pub fn skip_hidden(name: &str) -> bool {
    !name.starts_with('.')
}

/// Walk `root` with the default hidden-entry filter
pub async fn walk(root: &Path, prefix: &str) -> Result<PathSet, SftpError> {
    walk_with_filter(root, prefix, skip_hidden).await
}

/// Walk `root`, keeping only children whose name passes `filter`.
///
/// The root itself is never filtered. Runs on the blocking pool.
pub async fn walk_with_filter<F>(root: &Path, prefix: &str, filter: F) -> Result<PathSet, SftpError>
where
    F: Fn(&str) -> bool + Send + 'static,
{
    let root = root.to_path_buf();
    let prefix = prefix.to_string();
    tokio::task::spawn_blocking(move || walk_blocking(&root, &prefix, filter))
        .await
        .map_err(|e| SftpError::ProtocolError(format!("directory walk aborted: {}", e)))?
}

fn walk_blocking<F>(root: &Path, prefix: &str, filter: F) -> Result<PathSet, SftpError>
where
    F: Fn(&str) -> bool,
{
    let root_name = local_basename(root).ok_or_else(|| {
        SftpError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path has no final component: {}", root.display()),
        ))
    })?;
    let root_remote = join_remote_path(prefix, &root_name);

    let mut set = PathSet::default();

    if !std::fs::metadata(root)?.is_dir() {
        set.files.push(WalkedFile {
            local: root.to_path_buf(),
            relative: root_remote,
        });
        return Ok(set);
    }

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || filter(&entry.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .fold(root_remote.clone(), |acc, part| join_remote_path(&acc, &part))
            })
            .unwrap_or_else(|_| root_remote.clone());

        if entry.file_type().is_dir() {
            set.directories.push(relative);
        } else {
            set.files.push(WalkedFile {
                local: entry.into_path(),
                relative,
            });
        }
    }

    debug!(
        "Walked {:?}: {} directories, {} files",
        root,
        set.directories.len(),
        set.files.len()
    );
    Ok(set)
}
