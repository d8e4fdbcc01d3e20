//! Remote filesystem operations of a connected session
//!
//! Browsing, metadata, delete and move go through the subchannel; reading a
//! file and the long listing run shell commands on the transport.

use std::sync::Arc;

use tracing::{debug, info};

use super::channel::FileChannel;
use super::error::SftpError;
use super::listing::{parse_listing, LongListingEntry};
use super::path_utils::{join_remote_path, remote_basename, unixify};
use super::transfer::TransferQueue;
use super::types::{sort_entries, FileInfo};
use crate::ssh::{ConnectionRegistry, ConnectionRegistryError};

pub struct RemoteFs {
    registry: Arc<ConnectionRegistry>,
    concurrency: usize,
}

/// Quote `s` for a POSIX shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

impl From<ConnectionRegistryError> for SftpError {
    fn from(err: ConnectionRegistryError) -> Self {
        match err {
            ConnectionRegistryError::NotConnected(uid) => SftpError::NotConnected(uid),
            other => SftpError::ChannelError(other.to_string()),
        }
    }
}

impl RemoteFs {
    pub fn new(registry: Arc<ConnectionRegistry>, concurrency: usize) -> Self {
        Self {
            registry,
            concurrency,
        }
    }

    fn files(&self, session_uid: &str) -> Result<Arc<dyn FileChannel>, SftpError> {
        self.registry
            .files(session_uid)
            .ok_or_else(|| SftpError::NotConnected(session_uid.to_string()))
    }

    /// Entries of `path`, directories first
    pub async fn list_files(&self, session_uid: &str, path: &str) -> Result<Vec<FileInfo>, SftpError> {
        let files = self.files(session_uid)?;
        let path = unixify(path);

        let mut entries: Vec<FileInfo> = files
            .read_dir(&path)
            .await?
            .into_iter()
            .filter(|entry| entry.name != "." && entry.name != "..")
            .map(|entry| {
                let full = join_remote_path(&path, &entry.name);
                entry.stat.into_file_info(entry.name, full)
            })
            .collect();
        sort_entries(&mut entries);

        debug!("Listed {} entries in {} on session {}", entries.len(), path, session_uid);
        Ok(entries)
    }

    pub async fn file_info(&self, session_uid: &str, path: &str) -> Result<FileInfo, SftpError> {
        let files = self.files(session_uid)?;
        let path = unixify(path);
        let stat = files.stat(&path).await?;
        let name = match remote_basename(&path) {
            "" => "/".to_string(),
            name => name.to_string(),
        };
        Ok(stat.into_file_info(name, path))
    }

    pub async fn home_dir(&self, session_uid: &str) -> Result<String, SftpError> {
        let files = self.files(session_uid)?;
        files.realpath(".").await
    }

    /// Unlink every path. All deletions are attempted; failures are batched.
    pub async fn delete_files(&self, session_uid: &str, paths: &[String]) -> Result<(), SftpError> {
        let files = self.files(session_uid)?;
        info!("Deleting {} path(s) on session {}", paths.len(), session_uid);

        let queue = TransferQueue::new(self.concurrency);
        for path in paths {
            let files = files.clone();
            let path = unixify(path);
            queue.add(format!("unlink {}", path), async move {
                files.unlink(&path).await
            });
        }
        queue.wait_until_idle().await?;
        Ok(())
    }

    pub async fn move_file(&self, session_uid: &str, from: &str, to: &str) -> Result<(), SftpError> {
        let files = self.files(session_uid)?;
        let (from, to) = (unixify(from), unixify(to));
        info!("Moving {} to {} on session {}", from, to, session_uid);
        files.rename(&from, &to).await
    }

    /// File contents via `cat`
    pub async fn read_file(&self, session_uid: &str, path: &str) -> Result<String, SftpError> {
        let path = unixify(path);
        let output = self
            .registry
            .exec(session_uid, &format!("cat {}", shell_quote(&path)))
            .await?;

        match output.exit_code {
            Some(0) => Ok(output.stdout),
            Some(code) => Err(SftpError::ChannelError(format!(
                "reading {} failed with exit code {}: {}",
                path, code, output.stderr
            ))),
            None => Err(SftpError::ChannelError(format!(
                "reading {} ended without an exit status (signal {:?})",
                path, output.signal
            ))),
        }
    }

    /// Parsed `ls -l` of `path`
    pub async fn list_long(
        &self,
        session_uid: &str,
        path: &str,
    ) -> Result<Vec<LongListingEntry>, SftpError> {
        let path = unixify(path);
        let output = self
            .registry
            .exec(session_uid, &format!("ls -l {}", shell_quote(&path)))
            .await?;

        match output.exit_code {
            Some(0) => Ok(parse_listing(&output.stdout)),
            Some(code) => Err(SftpError::ChannelError(format!(
                "listing {} failed with exit code {}: {}",
                path, code, output.stderr
            ))),
            None => Err(SftpError::ChannelError(format!(
                "listing {} ended without an exit status (signal {:?})",
                path, output.signal
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionRecord, SessionStore};
    use crate::events::NoopEventSink;
    use crate::ssh::mock::{MockConnector, MOCK_HOME};
    use crate::ssh::ExecOutput;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        connector: Arc<MockConnector>,
        fs: RemoteFs,
        uid: String,
    }

    async fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let store = SessionStore::open(temp.path().join("sessions.json"));
        store.load().await.unwrap();
        let uid = store.add(SessionRecord::new("example.com", "bob")).session_uid;

        let connector = Arc::new(MockConnector::new());
        let registry = ConnectionRegistry::new(store, connector.clone(), Arc::new(NoopEventSink));
        registry.connect(&uid).await.unwrap();

        Fixture {
            _temp: temp,
            connector,
            fs: RemoteFs::new(registry, 5),
            uid,
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_not_connected() {
        let f = fixture().await;
        assert!(matches!(
            f.fs.list_files("ghost", "/").await,
            Err(SftpError::NotConnected(_))
        ));
        assert!(matches!(
            f.fs.read_file("ghost", "/etc/hosts").await,
            Err(SftpError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_list_files_sorted_with_metadata() {
        let f = fixture().await;
        f.connector.files.add_file("/home/mock/zeta.TXT", b"z");
        f.connector.files.add_file("/home/mock/.profile", b"p");
        f.connector.files.add_dir("/home/mock/projects");

        let entries = f.fs.list_files(&f.uid, MOCK_HOME).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["projects", ".profile", "zeta.TXT"]);

        assert!(entries[0].is_directory);
        assert_eq!(entries[0].file_type, "directory");
        assert_eq!(entries[0].path, "/home/mock/projects");
        assert!(entries[1].hidden);
        assert_eq!(entries[2].file_type, "txt");
        assert_eq!(entries[2].permissions, "644");
        assert!(entries[2].is_file);
    }

    #[tokio::test]
    async fn test_file_info_and_home_dir() {
        let f = fixture().await;
        f.connector.files.add_file("/srv/app.log", b"0123");

        let info = f.fs.file_info(&f.uid, "/srv/app.log").await.unwrap();
        assert_eq!(info.name, "app.log");
        assert_eq!(info.size, 4);
        assert_eq!(info.file_type, "log");

        assert_eq!(f.fs.home_dir(&f.uid).await.unwrap(), MOCK_HOME);
    }

    #[tokio::test]
    async fn test_delete_files_attempts_all() {
        let f = fixture().await;
        f.connector.files.add_file("/srv/a", b"a");
        f.connector.files.add_file("/srv/c", b"c");

        let err = f
            .fs
            .delete_files(&f.uid, &["/srv/a".into(), "/srv/b".into(), "/srv/c".into()])
            .await
            .unwrap_err();

        assert!(f.connector.files.file("/srv/a").is_none());
        assert!(f.connector.files.file("/srv/c").is_none());
        assert_eq!(err.into_task_errors().len(), 1);
    }

    #[tokio::test]
    async fn test_move_file_unixifies() {
        let f = fixture().await;
        f.connector.files.add_file("/srv/old.txt", b"x");

        f.fs
            .move_file(&f.uid, "\\srv\\old.txt", "/srv/new.txt")
            .await
            .unwrap();
        assert!(f.connector.files.file("/srv/new.txt").is_some());
        assert_eq!(
            f.connector.files.calls_starting_with("rename"),
            vec!["rename /srv/old.txt /srv/new.txt"]
        );
    }

    #[tokio::test]
    async fn test_read_file_and_list_long() {
        let f = fixture().await;
        f.connector.respond(
            "cat '/etc/motd'",
            Ok(ExecOutput {
                stdout: "welcome".into(),
                exit_code: Some(0),
                ..Default::default()
            }),
        );
        f.connector.respond(
            "cat '/nope'",
            Ok(ExecOutput {
                stderr: "cat: /nope: No such file or directory".into(),
                exit_code: Some(1),
                ..Default::default()
            }),
        );
        f.connector.respond(
            "ls -l '/srv'",
            Ok(ExecOutput {
                stdout: "total 4\ndrwxr-xr-x 2 root root 4096 Feb 14 08:30 www".into(),
                exit_code: Some(0),
                ..Default::default()
            }),
        );

        assert_eq!(f.fs.read_file(&f.uid, "/etc/motd").await.unwrap(), "welcome");
        assert!(matches!(
            f.fs.read_file(&f.uid, "/nope").await,
            Err(SftpError::ChannelError(_))
        ));

        let entries = f.fs.list_long(&f.uid, "/srv").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "www");
        assert!(entries[0].is_directory());
    }

    #[tokio::test]
    async fn test_read_interrupted_mid_command_fails() {
        let f = fixture().await;
        f.connector.respond(
            "cat '/var/log/big.log'",
            Err("channel closed before completion".into()),
        );
        f.connector.respond(
            "cat '/var/log/killed.log'",
            Ok(ExecOutput {
                stdout: "partial".into(),
                exit_code: None,
                signal: Some("KILL".into()),
                ..Default::default()
            }),
        );

        assert!(matches!(
            f.fs.read_file(&f.uid, "/var/log/big.log").await,
            Err(SftpError::ChannelError(_))
        ));
        assert!(matches!(
            f.fs.read_file(&f.uid, "/var/log/killed.log").await,
            Err(SftpError::ChannelError(_))
        ));
    }
}
