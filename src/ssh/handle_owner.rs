//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. Everything else talks to
//! it through a [`HandleController`], which sends commands over an mpsc
//! channel. The handle is never shared behind a lock, so nothing holds a
//! lock across `.await`.
//!
//! The owner task also watches the connection: it polls the handle for
//! closure and sends keepalives, and when the connection goes away it
//! broadcasts exactly one [`TransportEvent`] before exiting.

use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;
use super::transport::TransportEvent;

const KEEPALIVE_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (exec, sftp subsystem)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Timing knobs for the owner task
#[derive(Debug, Clone, Copy)]
pub struct LivenessConfig {
    pub poll_interval: Duration,
    pub keepalive_interval: Duration,
}

/// Controller for sending commands to the Handle Owner Task
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    events_tx: broadcast::Sender<TransportEvent>,
}

impl HandleController {
    /// Subscribe to the terminal event of this connection
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }

    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a HandleController for sending commands.
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    session_uid: String,
    liveness: LivenessConfig,
) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (events_tx, _) = broadcast::channel::<TransportEvent>(4);
    let task_events_tx = events_tx.clone();

    tokio::spawn(async move {
        info!("Handle owner task started for session {}", session_uid);

        let mut poll = tokio::time::interval(liveness.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut keepalive = tokio::time::interval(liveness.keepalive_interval);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Both intervals fire immediately on the first tick
        poll.tick().await;
        keepalive.tick().await;

        let terminal_event = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                        let result = handle.channel_open_session().await;
                        if reply_tx.send(result).is_err() {
                            warn!("Caller dropped before receiving channel_open_session result");
                        }
                    }
                    Some(HandleCommand::Disconnect) => {
                        info!("Disconnect requested for session {}", session_uid);
                        break TransportEvent::Close;
                    }
                    None => {
                        info!("All controllers dropped for session {}", session_uid);
                        break TransportEvent::Close;
                    }
                },

                _ = poll.tick() => {
                    if handle.is_closed() {
                        info!("Connection closed by peer for session {}", session_uid);
                        break TransportEvent::End;
                    }
                }

                _ = keepalive.tick() => {
                    debug!("Sending keepalive for session {}", session_uid);
                    match tokio::time::timeout(KEEPALIVE_REPLY_TIMEOUT, handle.send_keepalive(true)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!("Keepalive failed for session {}: {}", session_uid, e);
                            break TransportEvent::Error(e.to_string());
                        }
                        Err(_) => {
                            // Soft failure; actual closure is picked up by the poll
                            warn!("Keepalive timeout for session {} ({:?})", session_uid, KEEPALIVE_REPLY_TIMEOUT);
                        }
                    }
                }
            }
        };

        let _ = task_events_tx.send(terminal_event);

        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        info!("Handle owner task terminated for session {}", session_uid);
    });

    HandleController { cmd_tx, events_tx }
}

/// Drain all pending commands, returning Disconnected error to each
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_replies_disconnect() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(4);
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .unwrap();
        cmd_tx.send(HandleCommand::Disconnect).await.unwrap();

        drain_pending_commands(&mut cmd_rx);

        assert!(matches!(reply_rx.await, Ok(Err(russh::Error::Disconnect))));
        assert!(cmd_tx.is_closed());
    }

    #[tokio::test]
    async fn test_controller_reports_disconnected_when_owner_gone() {
        let (cmd_tx, cmd_rx) = mpsc::channel::<HandleCommand>(1);
        let (events_tx, _) = broadcast::channel(1);
        let controller = HandleController { cmd_tx, events_tx };
        drop(cmd_rx);

        assert!(!controller.is_connected());
        assert!(matches!(
            controller.open_session_channel().await,
            Err(SshError::Disconnected)
        ));
    }
}
