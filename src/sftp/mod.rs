//! SFTP file management module
//!
//! Remote browsing, recursive upload, file download and the bounded
//! transfer queue they all share.

pub mod channel;
pub mod engine;
pub mod error;
pub mod listing;
pub mod path_utils;
pub mod remote_fs;
pub mod session;
pub mod transfer;
pub mod types;
pub mod walker;

pub use channel::{FileChannel, ProgressFn, RemoteDirEntry, RemoteStat};
pub use engine::{mkdir_idempotent, RemoteTransferEngine};
pub use error::{BatchError, SftpError, TransferTaskError};
pub use listing::LongListingEntry;
pub use remote_fs::RemoteFs;
pub use session::SftpSession;
pub use transfer::TransferQueue;
pub use types::*;
pub use walker::{walk, walk_with_filter, PathSet, WalkedFile};
