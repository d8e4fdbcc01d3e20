//! Transport abstraction
//!
//! A [`Connector`] turns a [`SessionRecord`] into an authenticated
//! [`Transport`] plus its file-transfer subchannel. The registry owns the
//! result and never looks behind these traits, so tests can swap in the
//! in-memory implementation from `ssh::mock`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use super::error::SshError;
use crate::config::SessionRecord;
use crate::sftp::FileChannel;

/// Terminal condition reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Error(String),
    End,
    Close,
}

/// Buffered result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "code")]
    pub exit_code: Option<u32>,
    pub signal: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `command`, resolving once the channel has fully closed
    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);

    /// Subscribe to terminal events
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Whether the connection is already gone
    fn is_closed(&self) -> bool;
}

/// An authenticated transport and the subchannel derived from it
pub struct TransportLink {
    pub transport: Arc<dyn Transport>,
    pub files: Arc<dyn FileChannel>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, record: &SessionRecord) -> Result<TransportLink, SshError>;
}
