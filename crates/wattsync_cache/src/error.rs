//! Error types for cache operations.

use thiserror::Error;
use wattsync_protocol::{ProtocolError, RemoteError};
use wattsync_storage::StorageError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that abort a pull, a validation run or a report.
///
/// Drift found during validation is not an error: it is recorded as data.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The remote result service failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A pulled document is missing a field or has the wrong shape.
    #[error("malformed result document: {0}")]
    Document(#[from] ProtocolError),

    /// The result class code is not registered.
    #[error("unknown result class: {0}")]
    UnknownClass(String),
}
