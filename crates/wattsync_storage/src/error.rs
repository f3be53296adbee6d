//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot could not be encoded or decoded.
    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Another process holds the store.
    #[error("store is locked by another process: {0}")]
    Locked(String),

    /// The snapshot content is inconsistent.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}
