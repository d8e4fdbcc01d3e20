//! SFTP data types

use std::path::Path;

use serde::{Deserialize, Serialize};

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// File kind, decoded from the mode bits or the local file type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharacterDevice,
    Fifo,
    Socket,
    Unknown,
}

impl FileKind {
    /// Decode the `S_IFMT` bits of a POSIX mode
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => FileKind::File,
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            S_IFBLK => FileKind::BlockDevice,
            S_IFCHR => FileKind::CharacterDevice,
            S_IFIFO => FileKind::Fifo,
            S_IFSOCK => FileKind::Socket,
            _ => FileKind::Unknown,
        }
    }

    /// The `type` label shown for an entry called `name`.
    ///
    /// Regular files are labelled by their lowercase extension, or `"file"`
    /// when they have none.
    pub fn type_label(&self, name: &str) -> String {
        match self {
            FileKind::Directory => "directory".into(),
            FileKind::Symlink => "symlink".into(),
            FileKind::BlockDevice => "block-device".into(),
            FileKind::CharacterDevice => "character-device".into(),
            FileKind::Fifo => "fifo".into(),
            FileKind::Socket => "socket".into(),
            FileKind::File | FileKind::Unknown => Path::new(name)
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .filter(|ext| !ext.is_empty())
                .unwrap_or_else(|| "file".into()),
        }
    }
}

/// File entry information, local or remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// File name (not full path)
    pub name: String,
    /// Full path
    pub path: String,
    /// Display type, see [`FileKind::type_label`]
    #[serde(rename = "type")]
    pub file_type: String,
    pub kind: FileKind,
    /// Permission bits as octal, e.g. "755"
    pub permissions: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (Unix timestamp, seconds)
    pub modified: Option<i64>,
    /// Creation time where the platform has one, otherwise last access
    pub created: Option<i64>,
    pub hidden: bool,
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
}

impl FileInfo {
    pub fn new(
        name: String,
        path: String,
        kind: FileKind,
        mode: Option<u32>,
        size: u64,
        modified: Option<i64>,
        created: Option<i64>,
    ) -> Self {
        let permissions = mode
            .map(|p| format!("{:o}", p & 0o777))
            .unwrap_or_else(|| "000".to_string());

        Self {
            file_type: kind.type_label(&name),
            hidden: name.starts_with('.'),
            is_file: kind == FileKind::File,
            is_directory: kind == FileKind::Directory,
            is_symlink: kind == FileKind::Symlink,
            name,
            path,
            kind,
            permissions,
            size,
            modified,
            created,
        }
    }
}

/// Sort directories first, then by name
pub fn sort_entries(entries: &mut [FileInfo]) {
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.cmp(&b.name))
    });
}
