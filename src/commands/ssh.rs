//! Session and connection commands

use crate::config::SessionRecord;
use crate::ssh::{ConnectionRegistryError, ExecOutput};
use crate::state::AppState;

/// All stored sessions, in stored order
pub fn list_sessions(state: &AppState) -> Vec<SessionRecord> {
    state.store.list()
}

/// Store a new session. Any supplied identifier is replaced.
pub fn add_session(state: &AppState, record: SessionRecord) -> SessionRecord {
    state.store.add(record)
}

/// Returns whether a session was removed
pub fn remove_session(state: &AppState, session_uid: &str) -> bool {
    state.store.remove(session_uid)
}

pub async fn connect(state: &AppState, session_uid: &str) -> Result<(), ConnectionRegistryError> {
    state.registry.connect(session_uid).await
}

pub async fn disconnect(state: &AppState, session_uid: &str) {
    state.registry.disconnect(session_uid).await
}

pub fn is_connected(state: &AppState, session_uid: &str) -> bool {
    state.registry.is_connected(session_uid)
}

/// Run a command and return its complete output
pub async fn exec(
    state: &AppState,
    session_uid: &str,
    command: &str,
) -> Result<ExecOutput, ConnectionRegistryError> {
    state.registry.exec(session_uid, command).await
}
