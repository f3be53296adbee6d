//! Remote store boundary and an in-memory implementation.

use crate::digest::sha256_hex;
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;
use wattsync_protocol::{
    deep_merge, Ack, Clock, ListQuery, RemoteError, RemoteRecord, RemoteResult, SortOrder,
    SystemClock, VersionTag, UPDATED_FIELD,
};

/// Operations offered by one remote resource (one per entity class).
///
/// Every call either succeeds with a fresh version tag or fails with a
/// typed [`RemoteError`]. Callers must not retry `NotFound` or `Conflict`
/// blindly.
pub trait RemoteStore: Send + Sync {
    /// Fetches the current record under `key`.
    fn get(&self, key: &str) -> RemoteResult<RemoteRecord>;

    /// Creates (or idempotently re-creates) the record under `key`.
    fn create(&self, key: &str, payload: &Value) -> RemoteResult<Ack>;

    /// Patches the record under `key`, conditioned on `version` being current.
    fn update(&self, key: &str, payload: &Value, version: &VersionTag) -> RemoteResult<Ack>;

    /// Lists records matching the query.
    fn list(&self, query: &ListQuery) -> RemoteResult<Vec<RemoteRecord>>;
}

impl<R: RemoteStore + ?Sized> RemoteStore for Arc<R> {
    fn get(&self, key: &str) -> RemoteResult<RemoteRecord> {
        (**self).get(key)
    }

    fn create(&self, key: &str, payload: &Value) -> RemoteResult<Ack> {
        (**self).create(key, payload)
    }

    fn update(&self, key: &str, payload: &Value, version: &VersionTag) -> RemoteResult<Ack> {
        (**self).update(key, payload, version)
    }

    fn list(&self, query: &ListQuery) -> RemoteResult<Vec<RemoteRecord>> {
        (**self).list(query)
    }
}

#[derive(Debug, Clone)]
struct Stored {
    revision: u64,
    record: RemoteRecord,
}

/// Counters of calls served by a [`MemoryRemote`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCalls {
    /// `get` calls.
    pub gets: u64,
    /// `create` calls.
    pub creates: u64,
    /// `update` calls.
    pub updates: u64,
    /// `list` calls.
    pub lists: u64,
}

/// An in-memory remote store.
///
/// Behaves like the real service where it matters for reconciliation:
/// - every write that changes the document yields a new version tag
/// - identical creates and no-op updates return the current tag
/// - updates are deep-merge patches guarded by the presented tag
///
/// Failures can be injected per key to exercise error paths.
pub struct MemoryRemote {
    clock: Arc<dyn Clock>,
    records: RwLock<BTreeMap<String, Stored>>,
    failures: RwLock<HashMap<String, RemoteError>>,
    calls: RwLock<RemoteCalls>,
}

impl MemoryRemote {
    /// Creates an empty store using the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store stamping writes with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: RwLock::new(BTreeMap::new()),
            failures: RwLock::new(HashMap::new()),
            calls: RwLock::new(RemoteCalls::default()),
        }
    }

    /// Makes every call touching `key` fail with `error` until cleared.
    pub fn fail_on(&self, key: impl Into<String>, error: RemoteError) {
        self.failures.write().insert(key.into(), error);
    }

    /// Removes an injected failure.
    pub fn clear_failure(&self, key: &str) {
        self.failures.write().remove(key);
    }

    /// Deletes a record, as an operator would on the remote side.
    pub fn delete(&self, key: &str) -> bool {
        self.records.write().remove(key).is_some()
    }

    /// Applies a remote-side change, bumping the version tag.
    pub fn touch(&self, key: &str, patch: &Value) -> RemoteResult<Ack> {
        let mut records = self.records.write();
        let stored = records.get_mut(key).ok_or_else(|| RemoteError::NotFound {
            key: key.to_string(),
        })?;
        let mut payload = stored.record.payload.clone();
        deep_merge(&mut payload, patch);
        self.write(stored, payload, true);
        Ok(ack(&stored.record))
    }

    /// Returns the record under `key`, bypassing injected failures.
    pub fn record(&self, key: &str) -> Option<RemoteRecord> {
        self.records.read().get(key).map(|s| s.record.clone())
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns call counters.
    pub fn calls(&self) -> RemoteCalls {
        self.calls.read().clone()
    }

    fn check_failure(&self, key: &str) -> RemoteResult<()> {
        match self.failures.read().get(key) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn write(&self, stored: &mut Stored, payload: Value, force_bump: bool) {
        if !force_bump && stored.record.payload == payload {
            return;
        }
        stored.revision += 1;
        stored.record.version = version_tag(&stored.record.key, stored.revision, &payload);
        stored.record.updated_at = self.clock.now();
        stored.record.payload = payload;
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("records", &self.len())
            .finish()
    }
}

fn version_tag(key: &str, revision: u64, payload: &Value) -> VersionTag {
    let body = payload.to_string();
    let mut hex = sha256_hex(&[key.as_bytes(), &revision.to_be_bytes(), body.as_bytes()]);
    hex.truncate(16);
    VersionTag::new(hex)
}

fn ack(record: &RemoteRecord) -> Ack {
    Ack {
        key: record.key.clone(),
        version: record.version.clone(),
        updated_at: record.updated_at,
    }
}

impl RemoteStore for MemoryRemote {
    fn get(&self, key: &str) -> RemoteResult<RemoteRecord> {
        self.calls.write().gets += 1;
        self.check_failure(key)?;
        self.record(key).ok_or_else(|| RemoteError::NotFound {
            key: key.to_string(),
        })
    }

    fn create(&self, key: &str, payload: &Value) -> RemoteResult<Ack> {
        self.calls.write().creates += 1;
        self.check_failure(key)?;

        let mut records = self.records.write();
        if let Some(stored) = records.get_mut(key) {
            self.write(stored, payload.clone(), false);
            debug!(key, revision = stored.revision, "create on existing record");
            return Ok(ack(&stored.record));
        }

        let record = RemoteRecord {
            key: key.to_string(),
            version: version_tag(key, 1, payload),
            updated_at: self.clock.now(),
            payload: payload.clone(),
        };
        let out = ack(&record);
        records.insert(key.to_string(), Stored { revision: 1, record });
        Ok(out)
    }

    fn update(&self, key: &str, payload: &Value, version: &VersionTag) -> RemoteResult<Ack> {
        self.calls.write().updates += 1;
        self.check_failure(key)?;

        let mut records = self.records.write();
        let stored = records.get_mut(key).ok_or_else(|| RemoteError::NotFound {
            key: key.to_string(),
        })?;
        if stored.record.version != *version {
            return Err(RemoteError::Conflict {
                key: key.to_string(),
                expected: version.clone(),
            });
        }

        let mut merged = stored.record.payload.clone();
        deep_merge(&mut merged, payload);
        self.write(stored, merged, false);
        Ok(ack(&stored.record))
    }

    fn list(&self, query: &ListQuery) -> RemoteResult<Vec<RemoteRecord>> {
        self.calls.write().lists += 1;

        let mut matched: Vec<RemoteRecord> = self
            .records
            .read()
            .values()
            .map(|s| &s.record)
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        if let Some((field, order)) = &query.sort {
            matched.sort_by(|a, b| {
                let ord = if field.as_str() == UPDATED_FIELD {
                    a.updated_at.cmp(&b.updated_at)
                } else {
                    compare_fields(a.payload.get(field), b.payload.get(field))
                };
                match order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

/// Orders JSON scalars: missing < null < numbers < strings < others.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
