//! Local filesystem support module
//!
//! The local half of the file browser: listing, metadata and simple file
//! edits on the machine running sshdeck.

pub mod fs;

pub use fs::LocalFsError;
