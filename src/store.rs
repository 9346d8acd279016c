//! The remote store: where settings and the diagnostics ledger live.
//!
//! All calls are directory-scoped. The controller changes into the camera's
//! folder once and then names files relative to it.

mod directory;

use std::io;

use jiff::Timestamp;

use crate::model::DiagnosticsRecord;

pub use directory::DirectoryStore;

/// Errors from the remote store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote file not found: {0}")]
    NotFound(String),

    #[error("remote directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("invalid remote path: {0:?}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid timestamp: {0}")]
    Time(#[from] jiff::Error),
}

pub type Result<T> = core::result::Result<T, StoreError>;

/// Operations the controller needs from the remote store.
pub trait RemoteStore {
    /// Make `path` (relative to the store root) the current directory.
    fn change_directory(&mut self, path: &str, create_if_missing: bool) -> Result<()>;

    /// File names in the current directory, sorted.
    fn list_files(&mut self) -> Result<Vec<String>>;

    fn download_file(&mut self, name: &str) -> Result<Vec<u8>>;

    /// Create or replace a file.
    fn upload_file(&mut self, name: &str, contents: &[u8]) -> Result<()>;

    /// Append records to a list-of-maps ledger in one operation.
    fn append_records(&mut self, name: &str, records: &[DiagnosticsRecord]) -> Result<()>;

    fn last_modified(&mut self, name: &str) -> Result<Timestamp>;

    fn exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.list_files()?.iter().any(|f| f == name))
    }
}
