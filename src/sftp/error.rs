//! SFTP error types

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SftpError {
    #[error("Session not connected: {0}")]
    NotConnected(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Remote path exists and is not a directory: {0}")]
    MkdirConflict(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("SFTP protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Batch(BatchError),
}

/// One failed task inside a transfer batch
#[derive(Debug)]
pub struct TransferTaskError {
    /// What the task was doing, e.g. `put /home/bob/out/a.txt`
    pub label: String,
    pub source: SftpError,
}

impl fmt::Display for TransferTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.source)
    }
}

/// Aggregate of every task failure in a drained queue
#[derive(Debug)]
pub struct BatchError {
    pub failures: Vec<TransferTaskError>,
    /// Total tasks settled (successful and failed)
    pub settled: usize,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} transfer task(s) failed",
            self.failures.len(),
            self.settled
        )?;
        if let Some(first) = self.failures.first() {
            write!(f, " (first: {})", first)?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}

impl SftpError {
    /// Map a russh-sftp error for `path`
    pub fn from_remote(err: russh_sftp::client::error::Error, path: &str) -> Self {
        let err_str = err.to_string();
        if err_str.contains("No such file") || err_str.contains("not found") {
            SftpError::FileNotFound(path.to_string())
        } else if err_str.contains("Permission denied") {
            SftpError::PermissionDenied(path.to_string())
        } else {
            SftpError::ProtocolError(err_str)
        }
    }

    /// Flatten a batch into its individual task failures
    pub fn into_task_errors(self) -> Vec<TransferTaskError> {
        match self {
            SftpError::Batch(batch) => batch.failures,
            other => vec![TransferTaskError {
                label: String::new(),
                source: other,
            }],
        }
    }
}

impl serde::Serialize for SftpError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
