//! Per-entity sync cursors.

use crate::error::SyncResult;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use wattsync_protocol::{EntityRef, Marker, VersionTag};

/// Last confirmed synchronized point of one entity.
///
/// `version` is absent until the remote store acknowledged a first write.
/// `marker` is used by series entities to remember the last pushed point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Version tag of the last acknowledged write.
    pub version: Option<VersionTag>,
    /// Last confirmed point.
    pub marker: Option<Marker>,
}

impl Cursor {
    /// Returns true if the entity was never acknowledged by the remote store.
    pub fn is_unsynced(&self) -> bool {
        self.version.is_none() && self.marker.is_none()
    }
}

/// An acknowledged outcome to record against an entity's cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorCommit {
    /// Entity whose cursor moves.
    pub entity: EntityRef,
    /// Fresh version tag, if the write returned one worth keeping.
    pub version: Option<VersionTag>,
    /// Highest confirmed point, if any.
    pub marker: Option<Marker>,
}

/// Persistence of cursors in the system of record's own fields.
pub trait CursorBackend: Send + Sync {
    /// Loads the cursor of `entity`; missing cursors are empty.
    fn load(&self, entity: &EntityRef) -> SyncResult<Cursor>;

    /// Persists the cursor of `entity`.
    fn store(&self, entity: &EntityRef, cursor: &Cursor) -> SyncResult<()>;
}

/// Cursor store enforcing monotonic markers.
///
/// The only writer is the dispatcher, after a confirmed acknowledgment.
/// A commit never moves a marker backwards; a version tag is replaced
/// by the latest acknowledged one.
pub struct CursorStore {
    backend: Arc<dyn CursorBackend>,
    commit_lock: Mutex<()>,
}

impl CursorStore {
    /// Creates a store over a backend.
    pub fn new(backend: Arc<dyn CursorBackend>) -> Self {
        Self {
            backend,
            commit_lock: Mutex::new(()),
        }
    }

    /// Loads the cursor of `entity`.
    pub fn get(&self, entity: &EntityRef) -> SyncResult<Cursor> {
        self.backend.load(entity)
    }

    /// Applies a commit and returns true if the cursor changed.
    pub fn commit(&self, commit: &CursorCommit) -> SyncResult<bool> {
        let _guard = self.commit_lock.lock();
        let current = self.backend.load(&commit.entity)?;
        let mut next = current.clone();

        if let Some(version) = &commit.version {
            next.version = Some(version.clone());
        }
        if let Some(marker) = commit.marker {
            match current.marker {
                Some(existing) if existing >= marker => {
                    warn!(
                        entity = %commit.entity,
                        existing = %existing,
                        offered = %marker,
                        "ignoring non-advancing marker"
                    );
                }
                _ => next.marker = Some(marker),
            }
        }

        if next == current {
            return Ok(false);
        }
        self.backend.store(&commit.entity, &next)?;
        debug!(entity = %commit.entity, marker = ?next.marker, "cursor advanced");
        Ok(true)
    }
}

impl std::fmt::Debug for CursorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorStore").finish_non_exhaustive()
    }
}

/// An in-memory cursor backend.
#[derive(Debug, Default)]
pub struct MemoryCursorBackend {
    cursors: RwLock<HashMap<EntityRef, Cursor>>,
}

impl MemoryCursorBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a cursor, as if a previous run had stored it.
    pub fn seed(&self, entity: EntityRef, cursor: Cursor) {
        self.cursors.write().insert(entity, cursor);
    }

    /// Returns every stored cursor.
    pub fn snapshot(&self) -> HashMap<EntityRef, Cursor> {
        self.cursors.read().clone()
    }
}

impl CursorBackend for MemoryCursorBackend {
    fn load(&self, entity: &EntityRef) -> SyncResult<Cursor> {
        Ok(self.cursors.read().get(entity).cloned().unwrap_or_default())
    }

    fn store(&self, entity: &EntityRef, cursor: &Cursor) -> SyncResult<()> {
        self.cursors.write().insert(entity.clone(), cursor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use wattsync_protocol::EntityClass;

    fn meter() -> EntityRef {
        EntityRef::new(EntityClass::Measurement, 3, "ZIV0040318")
    }

    fn at(hour: u32) -> Marker {
        Marker::At(Utc.with_ymd_and_hms(2023, 1, 1, hour, 0, 0).unwrap())
    }

    fn commit(marker: Marker) -> CursorCommit {
        CursorCommit {
            entity: meter(),
            version: None,
            marker: Some(marker),
        }
    }

    #[test]
    fn empty_cursor() {
        let store = CursorStore::new(Arc::new(MemoryCursorBackend::new()));
        assert!(store.get(&meter()).unwrap().is_unsynced());
    }

    #[test]
    fn marker_only_moves_forward() {
        let store = CursorStore::new(Arc::new(MemoryCursorBackend::new()));

        assert!(store.commit(&commit(at(5))).unwrap());
        assert!(!store.commit(&commit(at(3))).unwrap());
        assert!(!store.commit(&commit(at(5))).unwrap());
        assert_eq!(store.get(&meter()).unwrap().marker, Some(at(5)));
    }

    #[test]
    fn version_is_replaced() {
        let store = CursorStore::new(Arc::new(MemoryCursorBackend::new()));
        let contract = EntityRef::contract(1, "C1");
        for tag in ["t1", "t2"] {
            store
                .commit(&CursorCommit {
                    entity: contract.clone(),
                    version: Some(VersionTag::new(tag)),
                    marker: None,
                })
                .unwrap();
        }
        assert_eq!(
            store.get(&contract).unwrap().version,
            Some(VersionTag::new("t2"))
        );
    }

    proptest! {
        #[test]
        fn marker_is_running_maximum(hours in prop::collection::vec(0u32..24, 1..40)) {
            let store = CursorStore::new(Arc::new(MemoryCursorBackend::new()));
            let mut max = None;
            for hour in hours {
                store.commit(&commit(at(hour))).unwrap();
                max = max.max(Some(at(hour)));
                prop_assert_eq!(store.get(&meter()).unwrap().marker, max);
            }
        }
    }
}
