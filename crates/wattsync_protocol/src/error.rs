//! Error types for protocol values.

use thiserror::Error;

/// Result type for protocol value parsing and transitions.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building or parsing protocol values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A period key could not be parsed.
    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    /// An entity class name is not known.
    #[error("unknown entity class: {0}")]
    UnknownClass(String),

    /// A document is missing a required field or has the wrong type.
    #[error("document field {field:?}: {reason}")]
    InvalidField {
        /// Field name.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A push state transition is not allowed.
    #[error("invalid push transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl ProtocolError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
