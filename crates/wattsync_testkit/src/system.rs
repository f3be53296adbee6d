//! An in-memory system of record.
//!
//! Implements the record source, cursor backend and mapper boundaries the
//! engine needs. Cursors live on the records themselves, the way the real
//! system keeps them in its own mutable fields.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use wattsync_engine::{
    ComponentStamp, Cursor, CursorBackend, EntityMapper, RecordSource, SeriesPoint, SourceEntity,
    SyncError, SyncResult, Targets,
};
use wattsync_protocol::{deep_merge, Clock, EntityClass, EntityRef, FixedClock};

#[derive(Debug, Clone)]
struct Modification {
    stamp: ComponentStamp,
    changes: Value,
}

#[derive(Debug, Clone)]
struct Record {
    created_at: DateTime<Utc>,
    written_at: DateTime<Utc>,
    document: Value,
    modifications: Vec<Modification>,
    devices: Vec<ComponentStamp>,
    active: Option<u64>,
    cancelled: bool,
    cursor: Cursor,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    records: BTreeMap<EntityRef, Record>,
    series: BTreeMap<EntityRef, Vec<SeriesPoint>>,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A fake system of record driven by a [`FixedClock`].
#[derive(Debug)]
pub struct FakeSystem {
    clock: Arc<FixedClock>,
    inner: RwLock<Inner>,
}

impl FakeSystem {
    /// Creates an empty system.
    pub fn new(clock: Arc<FixedClock>) -> Self {
        Self {
            clock,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn add(&self, class: EntityClass, key: &str, document: Value) -> EntityRef {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let entity = EntityRef::new(class, inner.next_id(), key);
        inner.records.insert(
            entity.clone(),
            Record {
                created_at: now,
                written_at: now,
                document,
                modifications: Vec::new(),
                devices: Vec::new(),
                active: None,
                cancelled: false,
                cursor: Cursor::default(),
            },
        );
        entity
    }

    /// Adds a contract with an initial modification starting today.
    pub fn add_contract(&self, key: &str, document: Value) -> EntityRef {
        let entity = self.add(EntityClass::Contract, key, document);
        self.modify_contract(&entity, self.clock.today(), json!({}));
        entity
    }

    /// Adds a modification to a contract and makes it the active one.
    pub fn modify_contract(&self, entity: &EntityRef, starts_on: NaiveDate, changes: Value) -> u64 {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let id = inner.next_id();
        if let Some(record) = inner.records.get_mut(entity) {
            record.modifications.push(Modification {
                stamp: ComponentStamp {
                    id,
                    written_at: now,
                    starts_on,
                },
                changes,
            });
            record.active = Some(id);
        }
        id
    }

    /// Attaches a device to a contract, or rewrites it if `id` is known.
    pub fn write_device(&self, entity: &EntityRef, id: Option<u64>) -> u64 {
        let now = self.clock.now();
        let today = self.clock.today();
        let mut inner = self.inner.write();
        let id = match id {
            Some(id) => id,
            None => inner.next_id(),
        };
        if let Some(record) = inner.records.get_mut(entity) {
            record.devices.retain(|d| d.id != id);
            record.devices.push(ComponentStamp {
                id,
                written_at: now,
                starts_on: today,
            });
        }
        id
    }

    /// Rewrites top-level fields of an entity.
    pub fn write(&self, entity: &EntityRef, changes: &Value) {
        let now = self.clock.now();
        if let Some(record) = self.inner.write().records.get_mut(entity) {
            deep_merge(&mut record.document, changes);
            record.written_at = now;
        }
    }

    /// Cancels an entity; cancelled entities are never selected.
    pub fn cancel(&self, entity: &EntityRef) {
        if let Some(record) = self.inner.write().records.get_mut(entity) {
            record.cancelled = true;
        }
    }

    /// Adds a tariff.
    pub fn add_tariff(&self, key: &str, document: Value) -> EntityRef {
        self.add(EntityClass::Tariff, key, document)
    }

    /// Adds the owner of a series (a meter or a contract profile).
    pub fn add_series_owner(&self, class: EntityClass, key: &str) -> EntityRef {
        let entity = self.add(class, key, json!({}));
        self.inner.write().series.insert(entity.clone(), Vec::new());
        entity
    }

    /// Records series points.
    pub fn record_points(&self, owner: &EntityRef, at: &[DateTime<Utc>]) {
        let mut inner = self.inner.write();
        let ids: Vec<u64> = at.iter().map(|_| inner.next_id()).collect();
        let points = inner.series.entry(owner.clone()).or_default();
        points.extend(ids.into_iter().zip(at).map(|(id, at)| SeriesPoint { id, at: *at }));
    }

    /// Returns the cursor stored on an entity.
    pub fn cursor(&self, entity: &EntityRef) -> Cursor {
        self.inner
            .read()
            .records
            .get(entity)
            .map(|r| r.cursor.clone())
            .unwrap_or_default()
    }

    /// Returns the id of the active modification.
    pub fn active_modification(&self, entity: &EntityRef) -> Option<u64> {
        self.inner.read().records.get(entity).and_then(|r| r.active)
    }
}

impl RecordSource for FakeSystem {
    fn entities(&self, class: EntityClass, targets: &Targets) -> SyncResult<Vec<SourceEntity>> {
        Ok(self
            .inner
            .read()
            .records
            .iter()
            .filter(|(entity, record)| {
                entity.class == class && !record.cancelled && targets.includes(&entity.key)
            })
            .map(|(entity, record)| SourceEntity {
                entity: entity.clone(),
                created_at: record.created_at,
                written_at: record.written_at,
                active_component: record.active,
            })
            .collect())
    }

    fn modifications(&self, entity: &EntityRef) -> SyncResult<Vec<ComponentStamp>> {
        Ok(self
            .inner
            .read()
            .records
            .get(entity)
            .map(|r| r.modifications.iter().map(|m| m.stamp.clone()).collect())
            .unwrap_or_default())
    }

    fn devices(&self, entity: &EntityRef) -> SyncResult<Vec<ComponentStamp>> {
        Ok(self
            .inner
            .read()
            .records
            .get(entity)
            .map(|r| r.devices.clone())
            .unwrap_or_default())
    }

    fn series_owners(&self, class: EntityClass, targets: &Targets) -> SyncResult<Vec<EntityRef>> {
        Ok(self
            .inner
            .read()
            .series
            .keys()
            .filter(|owner| owner.class == class && targets.includes(&owner.key))
            .cloned()
            .collect())
    }

    fn series_since(
        &self,
        _class: EntityClass,
        owner: &EntityRef,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<SeriesPoint>> {
        Ok(self
            .inner
            .read()
            .series
            .get(owner)
            .map(|points| points.iter().filter(|p| p.at > since).cloned().collect())
            .unwrap_or_default())
    }
}

impl CursorBackend for FakeSystem {
    fn load(&self, entity: &EntityRef) -> SyncResult<Cursor> {
        Ok(self.cursor(entity))
    }

    fn store(&self, entity: &EntityRef, cursor: &Cursor) -> SyncResult<()> {
        match self.inner.write().records.get_mut(entity) {
            Some(record) => {
                record.cursor = cursor.clone();
                Ok(())
            }
            None => Err(SyncError::Storage(format!("no record for {entity}"))),
        }
    }
}

impl EntityMapper for FakeSystem {
    fn entity_payload(&self, entity: &EntityRef, component: Option<u64>) -> SyncResult<Value> {
        let inner = self.inner.read();
        let record = inner
            .records
            .get(entity)
            .ok_or_else(|| SyncError::mapping(format!("no record for {entity}")))?;

        let mut modifications: Vec<&Modification> = record.modifications.iter().collect();
        modifications.sort_by_key(|m| (m.stamp.starts_on, m.stamp.id));
        let target = component.or(record.active);

        let mut document = record.document.clone();
        for modification in modifications {
            deep_merge(&mut document, &modification.changes);
            if Some(modification.stamp.id) == target {
                break;
            }
        }
        deep_merge(
            &mut document,
            &json!({"contractId": entity.key, "modification": target}),
        );
        Ok(document)
    }

    fn series_payload(&self, owner: &EntityRef, points: &[SeriesPoint]) -> SyncResult<Value> {
        let readings: Vec<Value> = points
            .iter()
            .map(|p| json!({"id": p.id, "date": p.at.to_rfc3339()}))
            .collect();
        Ok(json!({"deviceId": owner.key, "readings": readings}))
    }
}
