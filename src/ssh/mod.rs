//! SSH module - handles SSH connections and sessions
//!
//! This module provides the core SSH functionality using russh library.
//!
//! # Features
//! - Password, public key and keyboard-interactive authentication
//! - One owner task per connection with liveness polling and keepalive
//! - Buffered remote command execution
//! - Connection registry with lifecycle events (see `connection_registry`)

mod client;
pub mod connection_registry;
mod error;
mod handle_owner;
#[cfg(test)]
pub(crate) mod mock;
mod session;
mod transport;

pub use client::{ClientHandler, SshConnector};
pub use connection_registry::{
    ConnectionHandle, ConnectionRegistry, ConnectionRegistryError, ConnectionState,
};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController, LivenessConfig};
pub use session::SshSession;
pub use transport::{Connector, ExecOutput, Transport, TransportEvent, TransportLink};
