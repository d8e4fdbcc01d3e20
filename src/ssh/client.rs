//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, KeyboardInteractiveAuthResponse};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::ssh_key::HashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::error::SshError;
use super::handle_owner::{spawn_handle_owner_task, LivenessConfig};
use super::session::SshSession;
use super::transport::{Connector, TransportLink};
use crate::config::{CoreConfig, SessionRecord};
use crate::sftp::SftpSession;

/// Client handler for russh callbacks.
///
/// Every server host key is accepted; its fingerprint is logged.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "Accepting host key for {}:{} (fingerprint: {})",
            self.host,
            self.port,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

/// Opens real SSH connections for the registry
pub struct SshConnector {
    config: CoreConfig,
}

impl SshConnector {
    pub fn new(config: CoreConfig) -> Self {
        Self { config }
    }

    fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            poll_interval: Duration::from_millis(self.config.liveness_poll_millis.max(10)),
            keepalive_interval: Duration::from_secs(self.config.keepalive_interval_secs.max(1)),
        }
    }

    async fn open_authenticated(
        &self,
        record: &SessionRecord,
    ) -> Result<Handle<ClientHandler>, SshError> {
        let addr = format!("{}:{}", record.host, record.port);
        info!("Connecting to SSH server at {}", addr);

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed(format!("No address found for {}", addr)))?;

        let stream = tokio::net::TcpStream::connect(socket_addr)
            .await
            .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(self.config.keepalive_interval_secs.max(1))),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(record.host.clone(), record.port);
        let mut handle = client::connect_stream(Arc::new(ssh_config), stream, handler)
            .await
            .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        debug!("SSH handshake completed");

        authenticate(
            &mut handle,
            record,
            Duration::from_secs(self.config.auth_prompt_timeout_secs.max(1)),
        )
        .await?;

        info!("SSH authentication successful for {}@{}", record.username, addr);
        Ok(handle)
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, record: &SessionRecord) -> Result<TransportLink, SshError> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));
        let handle = tokio::time::timeout(timeout, self.open_authenticated(record))
            .await
            .map_err(|_| SshError::Timeout("Connection timed out".to_string()))??;

        let controller =
            spawn_handle_owner_task(handle, record.session_uid.clone(), self.liveness());

        let files = match SftpSession::open(&controller, record.session_uid.clone()).await {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    "SFTP unavailable for session {}, closing connection: {}",
                    record.session_uid, e
                );
                controller.disconnect().await;
                return Err(SshError::ChannelError(e.to_string()));
            }
        };

        Ok(TransportLink {
            transport: Arc::new(SshSession::new(record.session_uid.clone(), controller)),
            files: Arc::new(files),
        })
    }
}

/// Try public key, then password, then keyboard-interactive
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    record: &SessionRecord,
    prompt_timeout: Duration,
) -> Result<(), SshError> {
    let username = record.username.as_str();

    if let Some(pem) = &record.private_key {
        let key = russh::keys::decode_secret_key(pem, record.passphrase.as_deref())?;
        let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
        if result.success() {
            return Ok(());
        }
        debug!("Public key rejected for {}", username);
    }

    if let Some(password) = &record.password {
        let result = handle
            .authenticate_password(username, password)
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
        if result.success() {
            return Ok(());
        }
        debug!("Password rejected for {}, trying keyboard-interactive", username);
    }

    keyboard_interactive(handle, username, record.password.as_deref(), prompt_timeout).await
}

async fn keyboard_interactive(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    password: Option<&str>,
    prompt_timeout: Duration,
) -> Result<(), SshError> {
    let round_timeout =
        |_| SshError::Timeout("Keyboard-interactive round trip timed out".to_string());
    let rejected = |e: russh::Error| SshError::AuthenticationFailed(e.to_string());

    let mut response = tokio::time::timeout(
        prompt_timeout,
        handle.authenticate_keyboard_interactive_start(username, None::<String>),
    )
    .await
    .map_err(round_timeout)?
    .map_err(rejected)?;

    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(()),
            KeyboardInteractiveAuthResponse::Failure { .. } => {
                return Err(SshError::AuthenticationFailed(
                    "Authentication rejected by server".to_string(),
                ));
            }
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let texts: Vec<&str> = prompts.iter().map(|p| p.prompt.as_str()).collect();
                debug!("Keyboard-interactive request with {} prompt(s)", texts.len());
                let answers = answer_prompts(&texts, password)?;

                response = tokio::time::timeout(
                    prompt_timeout,
                    handle.authenticate_keyboard_interactive_respond(answers),
                )
                .await
                .map_err(round_timeout)?
                .map_err(rejected)?;
            }
        }
    }
}

/// Answer a keyboard-interactive request.
///
/// Only prompts asking for the password can be answered; any other prompt
/// fails authentication.
fn answer_prompts(prompts: &[&str], password: Option<&str>) -> Result<Vec<String>, SshError> {
    prompts
        .iter()
        .map(|prompt| match password {
            Some(pw) if prompt.to_lowercase().contains("password") => Ok(pw.to_string()),
            Some(_) => Err(SshError::AuthenticationFailed(format!(
                "Unsupported keyboard-interactive prompt: {}",
                prompt.trim()
            ))),
            None => Err(SshError::AuthenticationFailed(
                "Server asked for a password but none is stored".to_string(),
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_prompt_is_answered() {
        let answers = answer_prompts(&["Password: "], Some("hunter2")).unwrap();
        assert_eq!(answers, vec!["hunter2".to_string()]);

        let answers = answer_prompts(&["bob@host's PASSWORD:"], Some("pw")).unwrap();
        assert_eq!(answers, vec!["pw".to_string()]);
    }

    #[test]
    fn test_empty_request_gets_empty_answer() {
        assert!(answer_prompts(&[], None).unwrap().is_empty());
    }

    #[test]
    fn test_other_prompts_fail_immediately() {
        assert!(matches!(
            answer_prompts(&["Verification code: "], Some("pw")),
            Err(SshError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            answer_prompts(&["Password: "], None),
            Err(SshError::AuthenticationFailed(_))
        ));
    }
}
