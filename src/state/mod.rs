//! Application state
//!
//! [`AppState`] owns the session store, the connection registry and the
//! services built on them. Everything a command needs is reached through it.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::{CoreConfig, SessionStore, StorageError};
use crate::events::EventSink;
use crate::sftp::{RemoteFs, RemoteTransferEngine};
use crate::ssh::{ConnectionRegistry, Connector};

pub struct AppState {
    pub config: CoreConfig,
    pub store: Arc<SessionStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub transfers: RemoteTransferEngine,
    pub remote_fs: RemoteFs,
}

impl AppState {
    /// Build the state and load the persisted sessions
    pub async fn open(
        config: CoreConfig,
        sessions_path: PathBuf,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>, StorageError> {
        let store = SessionStore::open(sessions_path);
        let sessions = store.load().await?;
        info!("Loaded {} session(s) from {:?}", sessions.len(), store.path());

        let concurrency = config.effective_concurrency();
        let registry = ConnectionRegistry::new(store.clone(), connector, sink.clone());

        Ok(Arc::new(Self {
            transfers: RemoteTransferEngine::new(registry.clone(), sink, concurrency),
            remote_fs: RemoteFs::new(registry.clone(), concurrency),
            config,
            store,
            registry,
        }))
    }

    /// Disconnect every session and wait for pending store writes
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.registry.disconnect_all().await;
        self.store.flush().await;
    }
}
