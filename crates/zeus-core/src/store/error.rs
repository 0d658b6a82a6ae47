//! Error types for the atomic file store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The target file does not exist.
    #[error("not found: {path}")]
    NotFound { path: PathBuf },

    /// The file exists but its contents do not decode as the expected record.
    #[error("corrupt record in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StoreError {
    /// Whether this error is a plain missing-file condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Whether this error means the file was present but undecodable.
    ///
    /// Callers use this to route poison handling (delete, never retry) away
    /// from transient I/O handling (leave state as-is, retry next pass).
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}
