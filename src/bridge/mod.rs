//! JSON-lines bridge
//!
//! Reads one request object per line and writes one response object per
//! line. Session events are interleaved with responses on the same output.
//!
//! ```text
//! -> {"id":1,"command":"connect","args":{"sessionUid":"..."}}
//! <- {"event":"attempt-connect","sessionUid":"..."}
//! <- {"event":"connected","sessionUid":"..."}
//! <- {"id":1,"ok":true,"result":null}
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::commands::{dispatch, Command};
use crate::events::SessionEvent;
use crate::state::AppState;

/// Output line channel capacity
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: String) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Split a request line into its id and command
fn parse_request(line: &str) -> Result<(Value, Command), (Value, String)> {
    let mut value: Value =
        serde_json::from_str(line).map_err(|e| (Value::Null, format!("Invalid JSON: {}", e)))?;

    let id = value
        .as_object_mut()
        .and_then(|obj| obj.remove("id"))
        .unwrap_or(Value::Null);

    let command = serde_json::from_value(value)
        .map_err(|e| (id.clone(), format!("Invalid request: {}", e)))?;
    Ok((id, command))
}

fn encode<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(line) => Some(line),
        Err(e) => {
            warn!("Failed to encode bridge output: {}", e);
            None
        }
    }
}

/// Serve requests from `reader` until it reaches EOF.
///
/// Each request runs in its own task, so a long transfer never blocks other
/// commands. Responses of in-flight requests are still written after EOF.
pub async fn serve<R, W>(
    reader: R,
    mut writer: W,
    state: Arc<AppState>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTPUT_CHANNEL_CAPACITY);

    // Task: writer - consolidates responses and events
    let sender_task = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        debug!("Bridge writer stopped");
        Ok::<(), std::io::Error>(())
    });

    // Task: forward session events
    let event_tx = out_tx.clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(line) = encode(&event) else { continue };
            if event_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut requests = JoinSet::new();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let out_tx = out_tx.clone();
        match parse_request(line) {
            Ok((id, command)) => {
                let state = state.clone();
                requests.spawn(async move {
                    let name = command.name();
                    debug!("Bridge request {} ({})", id, name);
                    let response = match dispatch(&state, command).await {
                        Ok(result) => Response::ok(id, result),
                        Err(e) => {
                            debug!("Command {} failed: {}", name, e);
                            Response::err(id, e.to_string())
                        }
                    };
                    if let Some(line) = encode(&response) {
                        let _ = out_tx.send(line).await;
                    }
                });
            }
            Err((id, message)) => {
                warn!("Rejected bridge request: {}", message);
                if let Some(line) = encode(&Response::err(id, message)) {
                    let _ = out_tx.send(line).await;
                }
            }
        }
    }

    info!("Bridge input closed, waiting for {} request(s)", requests.len());
    while let Some(joined) = requests.join_next().await {
        if let Err(e) = joined {
            warn!("Bridge request task failed: {}", e);
        }
    }

    event_task.abort();
    drop(out_tx);

    match sender_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}
