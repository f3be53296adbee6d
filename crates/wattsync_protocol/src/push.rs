//! Per-entity push state machine.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a single entity push attempt.
///
/// ```text
/// Pending -> InFlight -> { Acked, Conflict, Failed }
/// ```
///
/// Only `Acked` advances the entity's cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushState {
    /// Selected for push, not yet sent.
    Pending,
    /// Sent to the remote store, awaiting its answer.
    InFlight,
    /// The remote store confirmed the write.
    Acked,
    /// The remote store rejected a stale version tag.
    Conflict,
    /// The push failed for any other reason.
    Failed,
}

impl PushState {
    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PushState::Acked | PushState::Conflict | PushState::Failed)
    }

    /// Returns true if reaching this state advances the cursor.
    pub fn advances_cursor(&self) -> bool {
        matches!(self, PushState::Acked)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: PushState) -> bool {
        matches!(
            (self, next),
            (PushState::Pending, PushState::InFlight)
                | (PushState::Pending, PushState::Failed)
                | (PushState::InFlight, PushState::Acked)
                | (PushState::InFlight, PushState::Conflict)
                | (PushState::InFlight, PushState::Failed)
        )
    }

    /// Moves to `next`, rejecting illegal transitions.
    pub fn transition(self, next: PushState) -> ProtocolResult<PushState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ProtocolError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for PushState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PushState::Pending => "pending",
            PushState::InFlight => "in_flight",
            PushState::Acked => "acked",
            PushState::Conflict => "conflict",
            PushState::Failed => "failed",
        };
        f.write_str(name)
    }
}
