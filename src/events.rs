//! Session events
//!
//! Connection lifecycle and transfer progress notifications pushed to
//! whoever drives the core. The registry and the transfer engine only see
//! an [`EventSink`]; how events reach a UI is the sink's business.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Event payload, serialized as `{"event": "<kind>", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    AttemptConnect { session_uid: String },

    #[serde(rename_all = "camelCase")]
    Connected { session_uid: String },

    #[serde(rename_all = "camelCase")]
    Error { session_uid: String, message: String },

    #[serde(rename_all = "camelCase")]
    Disconnected { session_uid: String },

    #[serde(rename_all = "camelCase")]
    UploadProgress {
        session_uid: String,
        transferred: u64,
        total: u64,
        /// Remote destination
        path: String,
        local_path: String,
    },

    #[serde(rename_all = "camelCase")]
    DownloadProgress {
        session_uid: String,
        transferred: u64,
        total: u64,
        /// Remote source
        path: String,
        local_path: String,
    },
}

impl SessionEvent {
    pub fn session_uid(&self) -> &str {
        match self {
            SessionEvent::AttemptConnect { session_uid }
            | SessionEvent::Connected { session_uid }
            | SessionEvent::Error { session_uid, .. }
            | SessionEvent::Disconnected { session_uid }
            | SessionEvent::UploadProgress { session_uid, .. }
            | SessionEvent::DownloadProgress { session_uid, .. } => session_uid,
        }
    }
}

/// Receiver of [`SessionEvent`]s.
///
/// `emit` is called from arbitrary tasks and must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

impl<F> EventSink for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn emit(&self, event: SessionEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded channel
#[derive(Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event receiver dropped, discarding event");
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: SessionEvent) {}
}

/// Keeps every emitted event in memory for assertions
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: parking_lot::Mutex<Vec<SessionEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn for_session(&self, session_uid: &str) -> Vec<SessionEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.session_uid() == session_uid)
            .collect()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = SessionEvent::Error {
            session_uid: "a1".into(),
            message: "boom".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "error", "sessionUid": "a1", "message": "boom"})
        );

        let event = SessionEvent::DownloadProgress {
            session_uid: "a1".into(),
            transferred: 10,
            total: 20,
            path: "/tmp/x".into(),
            local_path: "/home/me/x".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "download-progress");
        assert_eq!(value["localPath"], "/home/me/x");
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(SessionEvent::Connected {
            session_uid: "s".into(),
        });
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Connected {
                session_uid: "s".into()
            })
        );
    }

    #[test]
    fn test_closure_sink() {
        let seen = parking_lot::Mutex::new(0);
        let sink = |_: SessionEvent| *seen.lock() += 1;
        sink.emit(SessionEvent::Disconnected {
            session_uid: "s".into(),
        });
        assert_eq!(*seen.lock(), 1);
    }
}
