//! Configuration types: persisted session records and core settings

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default SSH port applied to records without a usable `port`
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default number of concurrently running transfer tasks
pub const DEFAULT_TRANSFER_CONCURRENCY: usize = 5;

/// Upper bound for any transfer queue's concurrency
pub const MAX_TRANSFER_CONCURRENCY: usize = 32;

/// A persisted set of remote-connection credentials.
///
/// Unknown JSON fields are kept in `extra` so a rewrite never loses data
/// written by other tools.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub session_uid: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// PEM/OpenSSH encoded private key material (not a path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionRecord {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            session_uid: String::new(),
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: None,
            private_key: None,
            passphrase: None,
            extra: Map::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session_uid", &self.session_uid)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Generate a collision-resistant session identifier
pub fn generate_session_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Reason a raw record was repaired or dropped during validation.
///
/// Only ever logged; callers see the corrected list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFault {
    NotAnObject,
    MissingSessionUid,
    DuplicateSessionUid,
    InvalidPort,
    InvalidCredentialField(&'static str),
    MissingHost,
    MissingUsername,
}

impl RecordFault {
    fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecordFault::NotAnObject | RecordFault::MissingHost | RecordFault::MissingUsername
        )
    }
}

/// Outcome of validating a raw session list
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub modified: usize,
    pub removed: usize,
    pub faults: Vec<(usize, RecordFault)>,
}

impl ValidationReport {
    /// Whether the on-disk list differs from the validated one
    pub fn needs_rewrite(&self) -> bool {
        self.modified > 0 || self.removed > 0
    }
}

const CREDENTIAL_FIELDS: [&str; 3] = ["password", "privateKey", "passphrase"];

/// Repair one raw record in place, returning every fault found.
fn inspect_record(value: &mut Value) -> Vec<RecordFault> {
    let Some(obj) = value.as_object_mut() else {
        return vec![RecordFault::NotAnObject];
    };

    let mut faults = Vec::new();

    if !obj.get("sessionUid").is_some_and(Value::is_string) {
        obj.insert("sessionUid".into(), Value::String(generate_session_uid()));
        faults.push(RecordFault::MissingSessionUid);
    }

    let port_ok = obj
        .get("port")
        .and_then(Value::as_u64)
        .is_some_and(|p| (1..=u16::MAX as u64).contains(&p));
    if !port_ok {
        obj.insert("port".into(), Value::from(DEFAULT_SSH_PORT));
        faults.push(RecordFault::InvalidPort);
    }

    for field in CREDENTIAL_FIELDS {
        if obj.get(field).is_some_and(|v| !v.is_string()) {
            obj.remove(field);
            faults.push(RecordFault::InvalidCredentialField(field));
        }
    }

    if !obj.get("host").is_some_and(Value::is_string) {
        faults.push(RecordFault::MissingHost);
    }
    if !obj.get("username").is_some_and(Value::is_string) {
        faults.push(RecordFault::MissingUsername);
    }

    faults
}

/// Validate a raw session list.
///
/// Records are visited from the end backward; repaired records stay in
/// place and faulty ones are removed, so surviving records keep their
/// relative order. The first record carrying an identifier keeps it; any
/// later record with the same identifier gets a fresh one.
pub fn validate_records(mut raw: Vec<Value>) -> (Vec<SessionRecord>, ValidationReport) {
    let mut report = ValidationReport::default();

    for index in (0..raw.len()).rev() {
        let faults = inspect_record(&mut raw[index]);
        if faults.is_empty() {
            continue;
        }

        if faults.iter().any(RecordFault::is_fatal) {
            raw.remove(index);
            report.removed += 1;
        } else {
            report.modified += 1;
        }
        report
            .faults
            .extend(faults.into_iter().map(|fault| (index, fault)));
    }

    let mut seen = HashSet::with_capacity(raw.len());
    for (index, value) in raw.iter_mut().enumerate() {
        let Some(obj) = value.as_object_mut() else {
            continue;
        };
        let Some(uid) = obj.get("sessionUid").and_then(Value::as_str) else {
            continue;
        };
        if seen.insert(uid.to_string()) {
            continue;
        }

        let fresh = loop {
            let candidate = generate_session_uid();
            if !seen.contains(&candidate) {
                break candidate;
            }
        };
        seen.insert(fresh.clone());
        obj.insert("sessionUid".into(), Value::String(fresh));
        report.modified += 1;
        report
            .faults
            .push((index, RecordFault::DuplicateSessionUid));
    }

    let mut records = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<SessionRecord>(value) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Dropping unreadable session record: {}", e);
                report.removed += 1;
            }
        }
    }

    (records, report)
}

/// Core runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Concurrent tasks per transfer queue
    #[serde(default = "default_transfer_concurrency")]
    pub transfer_concurrency: usize,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// SSH keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// How often the handle owner checks whether the socket is gone
    #[serde(default = "default_liveness_poll")]
    pub liveness_poll_millis: u64,

    /// Bound on a single keyboard-interactive round trip
    #[serde(default = "default_auth_prompt_timeout")]
    pub auth_prompt_timeout_secs: u64,
}

impl CoreConfig {
    /// Concurrency clamped to the supported range
    pub fn effective_concurrency(&self) -> usize {
        self.transfer_concurrency.clamp(1, MAX_TRANSFER_CONCURRENCY)
    }
}

fn default_transfer_concurrency() -> usize {
    DEFAULT_TRANSFER_CONCURRENCY
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_liveness_poll() -> u64 {
    1000
}

fn default_auth_prompt_timeout() -> u64 {
    30
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            transfer_concurrency: default_transfer_concurrency(),
            connect_timeout_secs: default_connect_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            liveness_poll_millis: default_liveness_poll(),
            auth_prompt_timeout_secs: default_auth_prompt_timeout(),
        }
    }
}
