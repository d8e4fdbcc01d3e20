//! Session Store
//!
//! In-memory list of [`SessionRecord`]s backed by a flat JSON array on disk.
//! Every mutation snapshots the full list and hands it to a single writer
//! task, so callers never wait on disk I/O and writes land in mutation order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::storage::{backup, write_atomic, StorageError};
use super::types::{generate_session_uid, validate_records, SessionRecord};

enum PersistCommand {
    Write(Vec<SessionRecord>),
    Flush(oneshot::Sender<()>),
}

pub struct SessionStore {
    path: PathBuf,
    records: RwLock<Vec<SessionRecord>>,
    writer_tx: mpsc::UnboundedSender<PersistCommand>,
    writes: Arc<AtomicUsize>,
}

impl SessionStore {
    /// Create a store for `path` and start its writer task.
    ///
    /// Must be called from within a Tokio runtime. The list is empty until
    /// [`SessionStore::load`] runs.
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let writes = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_writer(path.clone(), writer_rx, writes.clone()));

        Arc::new(Self {
            path,
            records: RwLock::new(Vec::new()),
            writer_tx,
            writes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read, validate and adopt the persisted list.
    ///
    /// Creates an empty file when none exists. If validation repaired or
    /// dropped anything, the corrected list is persisted exactly once.
    pub async fn load(&self) -> Result<Vec<SessionRecord>, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No session file at {:?}, creating an empty one", self.path);
                write_atomic(&self.path, b"[]").await?;
                String::from("[]")
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let raw = match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Array(items)) => items,
            Ok(_) | Err(_) => {
                warn!("Session file {:?} is not a JSON array, resetting", self.path);
                match backup(&self.path).await {
                    Ok(backup_path) => warn!("Previous session file kept at {:?}", backup_path),
                    Err(e) => error!("Failed to back up session file: {}", e),
                }
                write_atomic(&self.path, b"[]").await?;
                Vec::new()
            }
        };

        let (records, report) = validate_records(raw);
        for (index, fault) in &report.faults {
            debug!("Session record #{} fault: {:?}", index, fault);
        }

        let mut guard = self.records.write();
        *guard = records.clone();
        if report.needs_rewrite() {
            info!(
                "Removed {} and modified {} session(s) in the sessions file",
                report.removed, report.modified
            );
            self.schedule_persist(&guard);
        }
        drop(guard);

        Ok(records)
    }

    /// Snapshot of all records in stored order
    pub fn list(&self) -> Vec<SessionRecord> {
        self.records.read().clone()
    }

    pub fn get(&self, session_uid: &str) -> Option<SessionRecord> {
        self.records
            .read()
            .iter()
            .find(|r| r.session_uid == session_uid)
            .cloned()
    }

    pub fn contains(&self, session_uid: &str) -> bool {
        self.records
            .read()
            .iter()
            .any(|r| r.session_uid == session_uid)
    }

    /// Store a new record under a freshly generated identifier.
    ///
    /// Any identifier already on `record` is replaced.
    pub fn add(&self, mut record: SessionRecord) -> SessionRecord {
        let mut guard = self.records.write();
        loop {
            record.session_uid = generate_session_uid();
            if !guard.iter().any(|r| r.session_uid == record.session_uid) {
                break;
            }
        }
        guard.push(record.clone());
        info!(
            "Added session {} ({}@{}:{})",
            record.session_uid, record.username, record.host, record.port
        );
        self.schedule_persist(&guard);
        record
    }

    /// Remove a record; returns whether it existed
    pub fn remove(&self, session_uid: &str) -> bool {
        let mut guard = self.records.write();
        let before = guard.len();
        guard.retain(|r| r.session_uid != session_uid);
        let removed = guard.len() != before;
        if removed {
            info!("Removed session {}", session_uid);
            self.schedule_persist(&guard);
        }
        removed
    }

    /// Wait until every write queued so far has hit the disk
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer_tx.send(PersistCommand::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Number of full-list rewrites performed so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Queue a full-list rewrite. Called with the write lock held so
    /// snapshots are queued in mutation order.
    fn schedule_persist(&self, records: &[SessionRecord]) {
        if self
            .writer_tx
            .send(PersistCommand::Write(records.to_vec()))
            .is_err()
        {
            error!("Session writer task is gone, changes will not be persisted");
        }
    }
}

async fn run_writer(
    path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
    writes: Arc<AtomicUsize>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            PersistCommand::Write(snapshot) => {
                let result = match serde_json::to_vec_pretty(&snapshot) {
                    Ok(json) => write_atomic(&path, &json).await,
                    Err(e) => Err(StorageError::Json(e)),
                };
                match result {
                    Ok(()) => {
                        writes.fetch_add(1, Ordering::SeqCst);
                        debug!("Persisted {} session(s) to {:?}", snapshot.len(), path);
                    }
                    Err(e) => error!("Failed to persist sessions to {:?}: {}", path, e),
                }
            }
            PersistCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Session writer for {:?} stopped", path);
}
