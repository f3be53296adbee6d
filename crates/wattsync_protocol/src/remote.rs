//! Remote store records and failure taxonomy.

use crate::entity::VersionTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Name of the pseudo-field used to sort by last update.
pub const UPDATED_FIELD: &str = "_updated";

/// Result type for remote store operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failures returned by the remote store.
///
/// `NotFound` and `Conflict` are domain answers and must not be blindly
/// retried. `Transport` covers everything between us and the service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The remote store has no record under this key.
    #[error("remote record not found: {key}")]
    NotFound {
        /// Natural key.
        key: String,
    },

    /// The presented version tag is stale.
    #[error("version conflict on {key}: presented {expected}")]
    Conflict {
        /// Natural key.
        key: String,
        /// The tag the update was based on.
        expected: VersionTag,
    },

    /// Network or service failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether re-running the operation may succeed.
        retryable: bool,
    },
}

impl RemoteError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport { retryable, .. } => *retryable,
            RemoteError::NotFound { .. } | RemoteError::Conflict { .. } => false,
        }
    }

    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }

    /// Returns true for `Conflict`.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict { .. })
    }
}

/// A record as stored by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Natural key.
    pub key: String,
    /// Current version tag.
    pub version: VersionTag,
    /// When the remote store last persisted this record.
    pub updated_at: DateTime<Utc>,
    /// Stored document.
    pub payload: Value,
}

/// Acknowledgment of a successful create or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// Natural key.
    pub key: String,
    /// Fresh version tag.
    pub version: VersionTag,
    /// When the remote store persisted the write.
    pub updated_at: DateTime<Utc>,
}

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Filter and sort expression for `list`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    /// Equality filters on top-level payload fields.
    pub filter: Vec<(String, Value)>,
    /// Sort field and direction. Use [`UPDATED_FIELD`] for update time.
    pub sort: Option<(String, SortOrder)>,
    /// Maximum number of records.
    pub limit: Option<usize>,
}

impl ListQuery {
    /// Creates an unfiltered query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query for the most recently updated record.
    pub fn latest() -> Self {
        Self::new()
            .sorted_by(UPDATED_FIELD, SortOrder::Descending)
            .with_limit(1)
    }

    /// Adds an equality filter.
    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filter.push((field.into(), value));
        self
    }

    /// Sets the sort order.
    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }

    /// Sets the maximum number of records.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the record satisfies every filter.
    pub fn matches(&self, record: &RemoteRecord) -> bool {
        self.filter
            .iter()
            .all(|(field, value)| record.payload.get(field) == Some(value))
    }
}
