//! Configuration Management Module
//!
//! Handles the persisted session list and the runtime settings file.

pub mod storage;
pub mod store;
pub mod types;

pub use storage::{
    config_dir, load_settings, sessions_file, settings_file, StorageError,
};
pub use store::SessionStore;
pub use types::{
    generate_session_uid, CoreConfig, RecordFault, SessionRecord, ValidationReport,
    DEFAULT_SSH_PORT, DEFAULT_TRANSFER_CONCURRENCY, MAX_TRANSFER_CONCURRENCY,
};
