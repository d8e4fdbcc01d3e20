//! SSH Connection Registry
//!
//! Maps a session identifier to its live [`ConnectionHandle`]. At most one
//! handle exists per session. A handle is created by a successful
//! [`ConnectionRegistry::connect`] and destroyed either by
//! [`ConnectionRegistry::disconnect`] or by the first terminal event of its
//! transport (error, end or close). Lost connections are never retried here;
//! the caller has to connect again.
//!
//! ```text
//! disconnected ──connect──▶ connecting ──ok──▶ connected
//!       ▲                        │                 │
//!       └──── error ◀────────────┘                 │
//!       └──────────── disconnect / transport event ┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::transport::{Connector, ExecOutput, Transport, TransportEvent};
use crate::config::SessionStore;
use crate::events::{EventSink, SessionEvent};
use crate::sftp::FileChannel;

/// Connection state of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionRegistryError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session not connected: {0}")]
    NotConnected(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl Serialize for ConnectionRegistryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A live connection: the transport and the file-transfer subchannel
/// derived from it
pub struct ConnectionHandle {
    pub session_uid: String,
    pub transport: Arc<dyn Transport>,
    pub files: Arc<dyn FileChannel>,
    /// Distinguishes successive connections of the same session
    generation: u64,
}

/// Outcome of an in-flight connect, shared with concurrent callers
type ConnectOutcome = Option<Result<(), String>>;

pub struct ConnectionRegistry {
    store: Arc<SessionStore>,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn EventSink>,
    connections: DashMap<String, Arc<ConnectionHandle>>,
    pending: DashMap<String, watch::Receiver<ConnectOutcome>>,
    next_generation: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(
        store: Arc<SessionStore>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            connector,
            sink,
            connections: DashMap::new(),
            pending: DashMap::new(),
            next_generation: AtomicU64::new(1),
        })
    }

    /// Connect a stored session.
    ///
    /// Already connected: signals `connected` again and returns. Already
    /// connecting: waits for that attempt instead of opening a second
    /// transport.
    pub async fn connect(self: &Arc<Self>, session_uid: &str) -> Result<(), ConnectionRegistryError> {
        if self.connections.contains_key(session_uid) {
            debug!("Session {} already connected", session_uid);
            self.emit_connected(session_uid);
            return Ok(());
        }

        let record = self
            .store
            .get(session_uid)
            .ok_or_else(|| ConnectionRegistryError::SessionNotFound(session_uid.to_string()))?;

        let (outcome_tx, outcome_rx) = watch::channel::<ConnectOutcome>(None);
        match self.pending.entry(session_uid.to_string()) {
            Entry::Occupied(entry) => {
                let rx = entry.get().clone();
                drop(entry);
                debug!("Session {} is already connecting, waiting", session_uid);
                return wait_for_outcome(rx).await;
            }
            Entry::Vacant(entry) => {
                entry.insert(outcome_rx);
            }
        }
        let _claim = PendingClaim {
            pending: &self.pending,
            session_uid,
        };

        // A racing attempt may have completed between the first check and the claim
        if self.connections.contains_key(session_uid) {
            let _ = outcome_tx.send(Some(Ok(())));
            self.emit_connected(session_uid);
            return Ok(());
        }

        self.sink.emit(SessionEvent::AttemptConnect {
            session_uid: session_uid.to_string(),
        });
        info!(
            "Connecting session {} ({}@{}:{})",
            session_uid, record.username, record.host, record.port
        );

        match self.connector.connect(&record).await {
            Ok(link) => {
                let handle = Arc::new(ConnectionHandle {
                    session_uid: session_uid.to_string(),
                    transport: link.transport,
                    files: link.files,
                    generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
                });
                let events = handle.transport.subscribe();
                let already_closed = handle.transport.is_closed();

                self.connections
                    .insert(session_uid.to_string(), handle.clone());
                let _ = outcome_tx.send(Some(Ok(())));

                info!("Session {} connected", session_uid);
                self.emit_connected(session_uid);
                self.spawn_watcher(session_uid.to_string(), handle.generation, events, already_closed);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let _ = outcome_tx.send(Some(Err(message.clone())));

                error!("Failed to connect session {}: {}", session_uid, message);
                self.sink.emit(SessionEvent::Error {
                    session_uid: session_uid.to_string(),
                    message: message.clone(),
                });
                self.sink.emit(SessionEvent::Disconnected {
                    session_uid: session_uid.to_string(),
                });
                Err(ConnectionRegistryError::ConnectFailed(message))
            }
        }
    }

    /// Close the subchannel, then the transport. No-op when not connected.
    pub async fn disconnect(&self, session_uid: &str) {
        let Some((_, handle)) = self.connections.remove(session_uid) else {
            debug!("Disconnect ignored, session {} not connected", session_uid);
            return;
        };

        info!("Disconnecting session {}", session_uid);
        handle.files.close().await;
        handle.transport.close().await;

        self.sink.emit(SessionEvent::Disconnected {
            session_uid: session_uid.to_string(),
        });
    }

    /// Disconnect every connected session (shutdown)
    pub async fn disconnect_all(&self) {
        let session_uids = self.connected_sessions();
        info!("Disconnecting {} session(s)", session_uids.len());
        for session_uid in session_uids {
            self.disconnect(&session_uid).await;
        }
    }

    pub fn is_connected(&self, session_uid: &str) -> bool {
        self.connections.contains_key(session_uid)
    }

    pub fn state(&self, session_uid: &str) -> ConnectionState {
        if self.connections.contains_key(session_uid) {
            ConnectionState::Connected
        } else if self.pending.contains_key(session_uid) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn connected_sessions(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Live handle of a connected session
    pub fn handle(&self, session_uid: &str) -> Result<Arc<ConnectionHandle>, ConnectionRegistryError> {
        self.connections
            .get(session_uid)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ConnectionRegistryError::NotConnected(session_uid.to_string()))
    }

    /// File-transfer subchannel of a connected session
    pub fn files(&self, session_uid: &str) -> Option<Arc<dyn FileChannel>> {
        self.connections
            .get(session_uid)
            .map(|entry| entry.value().files.clone())
    }

    /// Run a command, buffering all output until the channel closes
    pub async fn exec(
        &self,
        session_uid: &str,
        command: &str,
    ) -> Result<ExecOutput, ConnectionRegistryError> {
        let handle = self.handle(session_uid)?;
        handle
            .transport
            .exec(command)
            .await
            .map_err(|e| ConnectionRegistryError::Channel(e.to_string()))
    }

    fn emit_connected(&self, session_uid: &str) {
        self.sink.emit(SessionEvent::Connected {
            session_uid: session_uid.to_string(),
        });
    }

    fn spawn_watcher(
        self: &Arc<Self>,
        session_uid: String,
        generation: u64,
        mut events: broadcast::Receiver<TransportEvent>,
        already_closed: bool,
    ) {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let event = if already_closed {
                TransportEvent::Close
            } else {
                match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Closed) => TransportEvent::Close,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        TransportEvent::Error("transport event stream lagged".to_string())
                    }
                }
            };

            if let Some(registry) = registry.upgrade() {
                registry
                    .on_transport_event(&session_uid, generation, event)
                    .await;
            }
        });
    }

    /// Tear down the handle that produced `event`, once.
    async fn on_transport_event(&self, session_uid: &str, generation: u64, event: TransportEvent) {
        let Some((_, handle)) = self
            .connections
            .remove_if(session_uid, |_, h| h.generation == generation)
        else {
            debug!(
                "Ignoring {:?} for session {}: handle already gone",
                event, session_uid
            );
            return;
        };

        match &event {
            TransportEvent::Error(message) => {
                warn!("Transport error on session {}: {}", session_uid, message);
                self.sink.emit(SessionEvent::Error {
                    session_uid: session_uid.to_string(),
                    message: message.clone(),
                });
            }
            TransportEvent::End | TransportEvent::Close => {
                info!("Transport for session {} ended ({:?})", session_uid, event);
            }
        }

        handle.files.close().await;
        handle.transport.close().await;

        self.sink.emit(SessionEvent::Disconnected {
            session_uid: session_uid.to_string(),
        });
    }
}

/// Releases the connecting claim on every exit path, including cancellation
struct PendingClaim<'a> {
    pending: &'a DashMap<String, watch::Receiver<ConnectOutcome>>,
    session_uid: &'a str,
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.session_uid);
    }
}

async fn wait_for_outcome(
    mut rx: watch::Receiver<ConnectOutcome>,
) -> Result<(), ConnectionRegistryError> {
    let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => Some(Err("connect attempt abandoned".to_string())),
    };
    match outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(message)) => Err(ConnectionRegistryError::ConnectFailed(message)),
        None => Err(ConnectionRegistryError::ConnectFailed(
            "connect attempt abandoned".to_string(),
        )),
    }
}
