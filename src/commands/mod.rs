//! Commands module
//!
//! Every operation a front end can request, as one serializable
//! [`Command`] enum, plus [`dispatch`] which runs it against an
//! [`AppState`] and returns a JSON result.

pub mod local;
pub mod sftp;
pub mod ssh;

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

use crate::config::SessionRecord;
use crate::local::LocalFsError;
use crate::sftp::SftpError;
use crate::ssh::ConnectionRegistryError;
use crate::state::AppState;

/// A request, serialized as `{"command": "<name>", "args": {...}}`
#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "command",
    content = "args",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    ListSessions,
    AddSession { session: SessionRecord },
    RemoveSession { session_uid: String },
    Connect { session_uid: String },
    Disconnect { session_uid: String },
    IsConnected { session_uid: String },
    Exec { session_uid: String, command: String },
    ListFiles { session_uid: String, path: String },
    ListLong { session_uid: String, path: String },
    ReadFile { session_uid: String, path: String },
    Upload {
        session_uid: String,
        local_paths: Vec<PathBuf>,
        remote_dir: String,
    },
    Download {
        session_uid: String,
        remote_paths: Vec<String>,
        local_dir: PathBuf,
    },
    DeleteFiles { session_uid: String, paths: Vec<String> },
    MoveFile {
        session_uid: String,
        source: String,
        destination: String,
    },
    FileInfo { session_uid: String, path: String },
    HomeDir { session_uid: String },
    LocalList { path: PathBuf },
    LocalInfo { path: PathBuf },
    LocalRead { path: PathBuf },
    LocalWrite { path: PathBuf, contents: String },
    LocalMove { source: PathBuf, destination: PathBuf },
    LocalDelete { path: PathBuf },
    LocalMkdir { path: PathBuf },
    LocalExists { path: PathBuf },
    LocalHomeDir,
}

impl Command {
    /// Wire name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::ListSessions => "list-sessions",
            Command::AddSession { .. } => "add-session",
            Command::RemoveSession { .. } => "remove-session",
            Command::Connect { .. } => "connect",
            Command::Disconnect { .. } => "disconnect",
            Command::IsConnected { .. } => "is-connected",
            Command::Exec { .. } => "exec",
            Command::ListFiles { .. } => "list-files",
            Command::ListLong { .. } => "list-long",
            Command::ReadFile { .. } => "read-file",
            Command::Upload { .. } => "upload",
            Command::Download { .. } => "download",
            Command::DeleteFiles { .. } => "delete-files",
            Command::MoveFile { .. } => "move-file",
            Command::FileInfo { .. } => "file-info",
            Command::HomeDir { .. } => "home-dir",
            Command::LocalList { .. } => "local-list",
            Command::LocalInfo { .. } => "local-info",
            Command::LocalRead { .. } => "local-read",
            Command::LocalWrite { .. } => "local-write",
            Command::LocalMove { .. } => "local-move",
            Command::LocalDelete { .. } => "local-delete",
            Command::LocalMkdir { .. } => "local-mkdir",
            Command::LocalExists { .. } => "local-exists",
            Command::LocalHomeDir => "local-home-dir",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Connection(#[from] ConnectionRegistryError),

    #[error(transparent)]
    Sftp(#[from] SftpError),

    #[error(transparent)]
    Local(#[from] LocalFsError),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl serde::Serialize for CommandError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, CommandError> {
    Ok(serde_json::to_value(value)?)
}

/// Run one command. Operations without a result yield `null`.
pub async fn dispatch(state: &AppState, command: Command) -> Result<Value, CommandError> {
    match command {
        Command::ListSessions => to_json(ssh::list_sessions(state)),
        Command::AddSession { session } => to_json(ssh::add_session(state, session)),
        Command::RemoveSession { session_uid } => {
            to_json(ssh::remove_session(state, &session_uid))
        }
        Command::Connect { session_uid } => to_json(ssh::connect(state, &session_uid).await?),
        Command::Disconnect { session_uid } => to_json(ssh::disconnect(state, &session_uid).await),
        Command::IsConnected { session_uid } => to_json(ssh::is_connected(state, &session_uid)),
        Command::Exec {
            session_uid,
            command,
        } => to_json(ssh::exec(state, &session_uid, &command).await?),

        Command::ListFiles { session_uid, path } => {
            to_json(sftp::list_files(state, &session_uid, &path).await?)
        }
        Command::ListLong { session_uid, path } => {
            to_json(sftp::list_long(state, &session_uid, &path).await?)
        }
        Command::ReadFile { session_uid, path } => {
            to_json(sftp::read_file(state, &session_uid, &path).await?)
        }
        Command::Upload {
            session_uid,
            local_paths,
            remote_dir,
        } => to_json(sftp::upload(state, &session_uid, &local_paths, &remote_dir).await?),
        Command::Download {
            session_uid,
            remote_paths,
            local_dir,
        } => to_json(sftp::download(state, &session_uid, &remote_paths, &local_dir).await?),
        Command::DeleteFiles { session_uid, paths } => {
            to_json(sftp::delete_files(state, &session_uid, &paths).await?)
        }
        Command::MoveFile {
            session_uid,
            source,
            destination,
        } => to_json(sftp::move_file(state, &session_uid, &source, &destination).await?),
        Command::FileInfo { session_uid, path } => {
            to_json(sftp::file_info(state, &session_uid, &path).await?)
        }
        Command::HomeDir { session_uid } => to_json(sftp::home_dir(state, &session_uid).await?),

        Command::LocalList { path } => to_json(local::local_list(&path).await?),
        Command::LocalInfo { path } => to_json(local::local_info(&path).await?),
        Command::LocalRead { path } => to_json(local::local_read(&path).await?),
        Command::LocalWrite { path, contents } => {
            to_json(local::local_write(&path, &contents).await?)
        }
        Command::LocalMove {
            source,
            destination,
        } => to_json(local::local_move(&source, &destination).await?),
        Command::LocalDelete { path } => to_json(local::local_delete(&path).await?),
        Command::LocalMkdir { path } => to_json(local::local_mkdir(&path).await?),
        Command::LocalExists { path } => to_json(local::local_exists(&path).await),
        Command::LocalHomeDir => to_json(local::local_home_dir()?),
    }
}
