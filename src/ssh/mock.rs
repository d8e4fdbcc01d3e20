//! In-memory transport for tests.
//!
//! [`MockConnector`] hands out [`MockTransport`]s that all share one
//! [`MockFileChannel`], a tiny remote filesystem. Every remote call is
//! appended to a shared log so tests can assert on ordering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::error::SshError;
use super::transport::{Connector, ExecOutput, Transport, TransportEvent, TransportLink};
use crate::config::SessionRecord;
use crate::sftp::{FileChannel, FileKind, ProgressFn, RemoteDirEntry, RemoteStat, SftpError};

pub(crate) const MOCK_HOME: &str = "/home/mock";
const MOCK_CHUNK: usize = 4;

type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

fn parent_of(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn normalize(path: &str) -> String {
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct MockFileChannel {
    nodes: Mutex<BTreeMap<String, Node>>,
    log: CallLog,
    failures: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl MockFileChannel {
    pub(crate) fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        nodes.insert("/home".to_string(), Node::Dir);
        nodes.insert(MOCK_HOME.to_string(), Node::Dir);
        Self {
            nodes: Mutex::new(nodes),
            log: Arc::new(Mutex::new(Vec::new())),
            failures: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a directory and any missing parents
    pub(crate) fn add_dir(&self, path: &str) {
        let mut nodes = self.nodes.lock();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            nodes.entry(current.clone()).or_insert(Node::Dir);
        }
    }

    pub(crate) fn add_file(&self, path: &str, contents: &[u8]) {
        self.add_dir(&parent_of(path));
        self.nodes
            .lock()
            .insert(normalize(path), Node::File(contents.to_vec()));
    }

    /// Make every call whose log line equals `call` fail
    pub(crate) fn fail_on(&self, call: &str) {
        self.failures.lock().insert(call.to_string());
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub(crate) fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().get(path) {
            Some(Node::File(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub(crate) fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.lock().get(path), Some(Node::Dir))
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn log_handle(&self) -> CallLog {
        self.log.clone()
    }

    async fn begin(&self, call: String) -> Result<InFlight<'_>, SftpError> {
        self.log.lock().push(call.clone());
        if self.is_closed() {
            return Err(SftpError::ChannelError("subchannel closed".into()));
        }
        if self.failures.lock().contains(&call) {
            return Err(SftpError::ProtocolError(format!("injected failure: {}", call)));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(guard)
    }

    fn stat_of(node: &Node) -> RemoteStat {
        match node {
            Node::Dir => RemoteStat {
                kind: FileKind::Directory,
                size: 4096,
                permissions: Some(0o040755),
                mtime: Some(1_700_000_000),
                atime: Some(1_700_000_000),
            },
            Node::File(bytes) => RemoteStat {
                kind: FileKind::File,
                size: bytes.len() as u64,
                permissions: Some(0o100644),
                mtime: Some(1_700_000_000),
                atime: Some(1_700_000_000),
            },
        }
    }

    fn require_dir(&self, path: &str) -> Result<(), SftpError> {
        match self.nodes.lock().get(path) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File(_)) => Err(SftpError::NotADirectory(path.to_string())),
            None => Err(SftpError::FileNotFound(path.to_string())),
        }
    }
}

fn report_chunks(total: u64, progress: ProgressFn<'_>) {
    if total == 0 {
        progress(0, 0);
        return;
    }
    let mut sent = 0u64;
    while sent < total {
        sent = (sent + MOCK_CHUNK as u64).min(total);
        progress(sent, total);
    }
}

#[async_trait]
impl FileChannel for MockFileChannel {
    async fn stat(&self, path: &str) -> Result<RemoteStat, SftpError> {
        let _g = self.begin(format!("stat {}", path)).await?;
        self.nodes
            .lock()
            .get(&normalize(path))
            .map(Self::stat_of)
            .ok_or_else(|| SftpError::FileNotFound(path.to_string()))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteDirEntry>, SftpError> {
        let _g = self.begin(format!("readdir {}", path)).await?;
        let dir = normalize(path);
        self.require_dir(&dir)?;
        let nodes = self.nodes.lock();
        Ok(nodes
            .iter()
            .filter(|(p, _)| p.as_str() != dir && parent_of(p) == dir)
            .map(|(p, node)| RemoteDirEntry {
                name: p.rsplit('/').next().unwrap_or_default().to_string(),
                stat: Self::stat_of(node),
            })
            .collect())
    }

    async fn mkdir(&self, path: &str) -> Result<(), SftpError> {
        let _g = self.begin(format!("mkdir {}", path)).await?;
        let path = normalize(path);
        self.require_dir(&parent_of(&path))?;
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&path) {
            return Err(SftpError::ProtocolError(format!("Failure: {} exists", path)));
        }
        nodes.insert(path, Node::Dir);
        Ok(())
    }

    async fn put(
        &self,
        local: &Path,
        remote: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, SftpError> {
        let _g = self.begin(format!("put {}", remote)).await?;
        let bytes = tokio::fs::read(local).await?;
        let remote = normalize(remote);
        self.require_dir(&parent_of(&remote))?;
        let total = bytes.len() as u64;
        self.nodes.lock().insert(remote, Node::File(bytes));
        report_chunks(total, progress);
        Ok(total)
    }

    async fn get(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<u64, SftpError> {
        let _g = self.begin(format!("get {}", remote)).await?;
        let bytes = match self.nodes.lock().get(&normalize(remote)) {
            Some(Node::File(bytes)) => bytes.clone(),
            Some(Node::Dir) => return Err(SftpError::ProtocolError(format!("{} is a directory", remote))),
            None => return Err(SftpError::FileNotFound(remote.to_string())),
        };
        tokio::fs::write(local, &bytes).await?;
        report_chunks(bytes.len() as u64, progress);
        Ok(bytes.len() as u64)
    }

    async fn unlink(&self, path: &str) -> Result<(), SftpError> {
        let _g = self.begin(format!("unlink {}", path)).await?;
        let key = normalize(path);
        let mut nodes = self.nodes.lock();
        match nodes.get(&key) {
            Some(Node::File(_)) => {}
            Some(Node::Dir) => {
                return Err(SftpError::ProtocolError(format!("{} is a directory", path)))
            }
            None => return Err(SftpError::FileNotFound(path.to_string())),
        }
        nodes.remove(&key);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        let _g = self.begin(format!("rename {} {}", from, to)).await?;
        let mut nodes = self.nodes.lock();
        let node = nodes
            .remove(&normalize(from))
            .ok_or_else(|| SftpError::FileNotFound(from.to_string()))?;
        nodes.insert(normalize(to), node);
        Ok(())
    }

    async fn realpath(&self, path: &str) -> Result<String, SftpError> {
        let _g = self.begin(format!("realpath {}", path)).await?;
        Ok(match path {
            "" | "." => MOCK_HOME.to_string(),
            p if p.starts_with('/') => normalize(p),
            p => format!("{}/{}", MOCK_HOME, p),
        })
    }

    async fn close(&self) {
        self.log.lock().push("sftp-close".to_string());
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct MockTransport {
    events: broadcast::Sender<TransportEvent>,
    closed: AtomicBool,
    log: CallLog,
    responses: Arc<Mutex<HashMap<String, Result<ExecOutput, String>>>>,
}

impl MockTransport {
    /// Simulate the connection dying
    pub(crate) fn fire(&self, event: TransportEvent) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        self.log.lock().push(format!("exec {}", command));
        if self.closed.load(Ordering::SeqCst) {
            return Err(SshError::Disconnected);
        }
        match self.responses.lock().get(command) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(message)) => Err(SshError::ChannelError(message.clone())),
            None => Ok(ExecOutput {
                exit_code: Some(0),
                ..Default::default()
            }),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.lock().push("transport-close".to_string());
            let _ = self.events.send(TransportEvent::Close);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockConnector {
    pub(crate) files: Arc<MockFileChannel>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    responses: Arc<Mutex<HashMap<String, Result<ExecOutput, String>>>>,
    connects: AtomicUsize,
    failure: Mutex<Option<String>>,
    delay: Mutex<Duration>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self {
            files: Arc::new(MockFileChannel::new()),
            transports: Mutex::new(Vec::new()),
            responses: Arc::new(Mutex::new(HashMap::new())),
            connects: AtomicUsize::new(0),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_connect(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub(crate) fn respond(&self, command: &str, output: Result<ExecOutput, String>) {
        self.responses.lock().insert(command.to_string(), output);
    }

    pub(crate) fn last_transport(&self) -> Option<Arc<MockTransport>> {
        self.transports.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, record: &SessionRecord) -> Result<TransportLink, SshError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.files
            .log_handle()
            .lock()
            .push(format!("connect {}@{}:{}", record.username, record.host, record.port));

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failure.lock().clone() {
            return Err(SshError::ConnectionFailed(message));
        }

        self.files.reopen();
        let (events, _) = broadcast::channel(8);
        let transport = Arc::new(MockTransport {
            events,
            closed: AtomicBool::new(false),
            log: self.files.log_handle(),
            responses: self.responses.clone(),
        });
        self.transports.lock().push(transport.clone());

        Ok(TransportLink {
            transport,
            files: self.files.clone(),
        })
    }
}
