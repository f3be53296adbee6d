//! System-of-record and mapping boundaries.

use crate::error::SyncResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wattsync_protocol::{EntityClass, EntityRef};

/// Restriction of a detection pass to explicit entities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Targets {
    /// Every eligible entity.
    #[default]
    All,
    /// Only the entities with these natural keys.
    Keys(Vec<String>),
}

impl Targets {
    /// Builds a key restriction.
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Targets::Keys(keys.into_iter().map(Into::into).collect())
    }

    /// Returns true if `key` is selected.
    pub fn includes(&self, key: &str) -> bool {
        match self {
            Targets::All => true,
            Targets::Keys(keys) => keys.iter().any(|k| k == key),
        }
    }
}

/// A top-level entity with its change-tracking metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntity {
    /// Entity reference.
    pub entity: EntityRef,
    /// When the entity was created in the system of record.
    pub created_at: DateTime<Utc>,
    /// Last write to the top-level record.
    pub written_at: DateTime<Utc>,
    /// The currently active sub-record (for contracts, the active modification).
    pub active_component: Option<u64>,
}

/// Write stamp of a sub-record (contract modification or metering device).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStamp {
    /// Sub-record identifier.
    pub id: u64,
    /// Last write to the sub-record.
    pub written_at: DateTime<Utc>,
    /// First day the sub-record applies.
    pub starts_on: NaiveDate,
}

/// One point of a time series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Local identifier.
    pub id: u64,
    /// Measurement instant; also the cursor value once confirmed.
    pub at: DateTime<Utc>,
}

/// Read access to the local system of record.
///
/// Implementations decide eligibility (for example drafts and cancelled
/// contracts are never returned) and must never mutate business fields.
pub trait RecordSource: Send + Sync {
    /// Returns the entities of a versioned class selected by `targets`.
    fn entities(&self, class: EntityClass, targets: &Targets) -> SyncResult<Vec<SourceEntity>>;

    /// Returns the modification records that compose `entity`.
    fn modifications(&self, entity: &EntityRef) -> SyncResult<Vec<ComponentStamp>>;

    /// Returns the devices attached to `entity`.
    fn devices(&self, entity: &EntityRef) -> SyncResult<Vec<ComponentStamp>>;

    /// Returns the owners of series data for a series class.
    fn series_owners(&self, class: EntityClass, targets: &Targets) -> SyncResult<Vec<EntityRef>>;

    /// Returns the points of `owner` strictly after `since`.
    fn series_since(
        &self,
        class: EntityClass,
        owner: &EntityRef,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<SeriesPoint>>;
}

/// Declarative entity to wire-format mapping.
pub trait EntityMapper: Send + Sync {
    /// Builds the document for `entity`, optionally as of one component.
    fn entity_payload(&self, entity: &EntityRef, component: Option<u64>) -> SyncResult<Value>;

    /// Builds the document carrying a batch of series points.
    fn series_payload(&self, owner: &EntityRef, points: &[SeriesPoint]) -> SyncResult<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_selection() {
        assert!(Targets::All.includes("C1"));
        let keys = Targets::keys(["C1", "C2"]);
        assert!(keys.includes("C2"));
        assert!(!keys.includes("C3"));
    }
}
