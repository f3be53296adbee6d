//! Error types for the sync engine.

use thiserror::Error;
use wattsync_protocol::{EntityClass, ProtocolError, RemoteError};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The remote store answered with a failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The system of record failed.
    #[error("record source error: {0}")]
    Source(String),

    /// An entity could not be mapped to its wire document.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// Cursor persistence failed.
    #[error("cursor storage error: {0}")]
    Storage(String),

    /// No collaborator is registered for this entity class.
    #[error("no handler registered for entity class {0}")]
    UnknownClass(EntityClass),

    /// A protocol value was invalid.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A job exceeded its wall-clock budget.
    #[error("operation timed out")]
    Timeout,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a system-of-record error.
    pub fn source(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    /// Creates a mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping(message.into())
    }

    /// Returns true if re-running detection and dispatch may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true if the remote store rejected a stale version tag.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_conflict())
    }
}
