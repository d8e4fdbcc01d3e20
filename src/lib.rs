//! SshDeck - SSH session manager with SFTP transfers
//!
//! Stores SSH session definitions, keeps live connections keyed by session
//! and moves files over SFTP with bounded concurrency. A front end drives it
//! through the JSON-lines bridge on stdin/stdout.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod events;
pub mod local;
pub mod sftp;
pub mod ssh;
pub mod state;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::StorageError;
use events::ChannelEventSink;
use ssh::SshConnector;
use state::AppState;

/// Startup and shutdown errors
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to load configuration: {0}")]
    Storage(#[from] StorageError),

    #[error("Bridge I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize logging. stdout carries the bridge, so logs go to stderr.
fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Load settings and sessions, then serve the bridge until stdin closes
pub async fn run() -> Result<(), RunError> {
    init_logging();
    tracing::info!("SshDeck {} starting", env!("CARGO_PKG_VERSION"));

    let settings = config::load_settings(&config::settings_file()?).await?;
    tracing::info!(
        "Transfer concurrency {}, connect timeout {}s",
        settings.effective_concurrency(),
        settings.connect_timeout_secs
    );

    let (sink, events) = ChannelEventSink::new();
    let connector = Arc::new(SshConnector::new(settings.clone()));
    let state = AppState::open(
        settings,
        config::sessions_file()?,
        connector,
        Arc::new(sink),
    )
    .await?;

    let served = bridge::serve(tokio::io::stdin(), tokio::io::stdout(), state.clone(), events).await;
    state.shutdown().await;

    served?;
    tracing::info!("SshDeck stopped");
    Ok(())
}
