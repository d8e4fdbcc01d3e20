//! SSH Session: the russh-backed [`Transport`]

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use russh::{ChannelMsg, Sig};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::error::SshError;
use super::handle_owner::HandleController;
use super::transport::{ExecOutput, Transport, TransportEvent};

/// A connected SSH session.
///
/// Holds only the [`HandleController`]; the russh handle itself lives in the
/// owner task.
pub struct SshSession {
    session_uid: String,
    controller: HandleController,
}

impl SshSession {
    pub fn new(session_uid: String, controller: HandleController) -> Self {
        Self {
            session_uid,
            controller,
        }
    }
}

fn signal_name(sig: &Sig) -> String {
    match sig {
        Sig::Custom(name) => name.clone(),
        other => format!("{:?}", other),
    }
}

/// Buffer a command's output until the channel closes.
///
/// Exit status and EOF can arrive before the last data, so only `Close`
/// ends the command. A stream that ends without `Close` means the
/// connection went away mid-command.
async fn collect_exec_output<S>(mut messages: S) -> Result<ExecOutput, SshError>
where
    S: Stream<Item = ChannelMsg> + Unpin,
{
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut output = ExecOutput::default();
    let mut closed = false;

    while let Some(msg) = messages.next().await {
        match msg {
            ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                output.exit_code = Some(exit_status);
            }
            ChannelMsg::ExitSignal { signal_name: sig, .. } => {
                output.signal = Some(signal_name(&sig));
            }
            ChannelMsg::Close => {
                closed = true;
                break;
            }
            _ => {}
        }
    }

    if !closed {
        return Err(SshError::ChannelError(
            "channel closed before completion".to_string(),
        ));
    }

    output.stdout = String::from_utf8_lossy(&stdout).trim().to_string();
    output.stderr = String::from_utf8_lossy(&stderr).trim().to_string();
    Ok(output)
}

#[async_trait]
impl Transport for SshSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        debug!("Exec on session {}: {}", self.session_uid, command);

        let mut channel = self.controller.open_session_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(format!("Exec request failed: {}", e)))?;

        let messages = futures_util::stream::unfold(channel, |mut channel| async move {
            channel.wait().await.map(|msg| (msg, channel))
        });
        let output = collect_exec_output(Box::pin(messages)).await?;

        debug!(
            "Exec finished on session {} (code {:?}, signal {:?})",
            self.session_uid, output.exit_code, output.signal
        );
        Ok(output)
    }

    async fn close(&self) {
        info!("Closing SSH transport for session {}", self.session_uid);
        self.controller.disconnect().await;
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.controller.subscribe()
    }

    fn is_closed(&self) -> bool {
        !self.controller.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use russh::CryptoVec;

    fn data(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::Data {
            data: CryptoVec::from_slice(bytes),
        }
    }

    #[tokio::test]
    async fn test_output_collected_until_close() {
        let messages = stream::iter(vec![
            data(b"hello "),
            ChannelMsg::ExitStatus { exit_status: 0 },
            ChannelMsg::Eof,
            data(b"world\n"),
            ChannelMsg::ExtendedData {
                data: CryptoVec::from_slice(b"warn"),
                ext: 1,
            },
            ChannelMsg::Close,
        ]);
        let output = collect_exec_output(messages).await.unwrap();
        assert_eq!(output.stdout, "hello world");
        assert_eq!(output.stderr, "warn");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_connection_lost_mid_command_is_an_error() {
        let messages = stream::iter(vec![data(b"partial contents")]);
        let result = collect_exec_output(messages).await;
        assert!(matches!(result, Err(SshError::ChannelError(_))));
    }

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(&Sig::TERM), "TERM");
        assert_eq!(signal_name(&Sig::Custom("USR9".into())), "USR9");
    }
}
