//! Path utilities for SFTP operations
//!
//! Remote SFTP paths always use `/` as separator, whatever the local platform
//! or the remote OS. Everything that reaches a [`FileChannel`] goes through
//! [`unixify`] first.
//!
//! [`FileChannel`]: super::channel::FileChannel

use std::path::Path;

/// Convert every `\` to `/`.
pub fn unixify(path: &str) -> String {
    path.replace('\\', "/")
}

/// Join remote SFTP path components using `/` separator.
///
/// An empty base yields the component unchanged.
pub fn join_remote_path(base: &str, component: &str) -> String {
    let component = component.trim_start_matches('/');
    if base.is_empty() {
        component.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Last component of a remote path, ignoring trailing separators
pub fn remote_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Final component of a local path as a UTF-8 string
pub fn local_basename(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
