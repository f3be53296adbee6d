//! In-memory store for tests and single-process runs.

use crate::error::StorageResult;
use crate::store::{ErrorStore, ResultStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wattsync_protocol::{CachedResult, ErrorQuery, ErrorRecord, Period, PeriodRange};

/// Full content of a store: result collections plus the error log.
///
/// Shared by [`MemoryStore`] and the file store, which persists it as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Collections {
    #[serde(default)]
    pub(crate) results: BTreeMap<String, Vec<CachedResult>>,
    #[serde(default)]
    pub(crate) errors: Vec<ErrorRecord>,
}

impl Collections {
    fn rows<'a>(
        &'a self,
        collection: &str,
        contract: &'a str,
        range: PeriodRange,
    ) -> impl Iterator<Item = &'a CachedResult> + 'a {
        self.results
            .get(collection)
            .into_iter()
            .flatten()
            .filter(move |r| r.contract_id == contract && range.contains(r.period))
    }

    pub(crate) fn find(
        &self,
        collection: &str,
        contract: &str,
        range: PeriodRange,
    ) -> Vec<CachedResult> {
        let mut rows: Vec<CachedResult> = self.rows(collection, contract, range).cloned().collect();
        rows.sort_by_key(|r| r.period);
        rows
    }

    pub(crate) fn insert(&mut self, collection: &str, result: CachedResult) {
        self.results
            .entry(collection.to_string())
            .or_default()
            .push(result);
    }

    /// Removes rows matching `pred`, returning their periods.
    fn remove_where(
        &mut self,
        collection: &str,
        contract: &str,
        mut pred: impl FnMut(Period) -> bool,
    ) -> Vec<Period> {
        let Some(rows) = self.results.get_mut(collection) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        rows.retain(|r| {
            if r.contract_id == contract && pred(r.period) {
                removed.push(r.period);
                false
            } else {
                true
            }
        });
        removed.sort();
        removed
    }

    pub(crate) fn remove(&mut self, collection: &str, contract: &str, range: PeriodRange) -> usize {
        self.remove_where(collection, contract, |p| range.contains(p))
            .len()
    }

    pub(crate) fn remove_except(
        &mut self,
        collection: &str,
        contract: &str,
        keep: &[PeriodRange],
    ) -> Vec<Period> {
        self.remove_where(collection, contract, |p| !keep.iter().any(|r| r.contains(p)))
    }

    pub(crate) fn replace(&mut self, collection: &str, result: CachedResult) {
        let contract = result.contract_id.clone();
        self.remove(collection, &contract, PeriodRange::exact(result.period));
        self.insert(collection, result);
    }

    pub(crate) fn sum(&self, collection: &str, contract: &str, range: PeriodRange) -> Option<f64> {
        self.rows(collection, contract, range)
            .map(|r| r.value)
            .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
    }

    pub(crate) fn count(&self, collection: &str, contract: Option<&str>) -> usize {
        self.results
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|r| contract.map_or(true, |c| r.contract_id == c))
            .count()
    }

    pub(crate) fn collections(&self) -> Vec<String> {
        self.results.keys().cloned().collect()
    }

    pub(crate) fn has_error(&self, record: &ErrorRecord) -> bool {
        self.errors.contains(record)
    }

    pub(crate) fn find_errors(&self, query: &ErrorQuery) -> Vec<ErrorRecord> {
        self.errors
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect()
    }

    pub(crate) fn count_errors(&self, query: &ErrorQuery) -> usize {
        self.errors.iter().filter(|r| query.matches(r)).count()
    }

    pub(crate) fn remove_errors(&mut self, query: &ErrorQuery) -> usize {
        let before = self.errors.len();
        self.errors.retain(|r| !query.matches(r));
        before - self.errors.len()
    }
}

/// An in-memory result and error store.
///
/// # Thread Safety
///
/// All operations take an internal lock, so one store can be shared by
/// reference across worker threads.
///
/// # Example
///
/// ```rust
/// use chrono::NaiveDate;
/// use wattsync_protocol::{ErrorKind, ErrorQuery, ErrorRecord};
/// use wattsync_storage::{ErrorStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// let today = NaiveDate::from_ymd_opt(2023, 5, 1).unwrap();
/// let period = "202301".parse().unwrap();
/// let record = ErrorRecord::new("ot101", "C1", period, ErrorKind::NoResult, today);
/// assert!(store.record_unique(record.clone()).unwrap());
/// assert!(!store.record_unique(record).unwrap());
/// assert_eq!(store.count_errors(&ErrorQuery::all()).unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Collections>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored error record.
    #[must_use]
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.state.read().errors.clone()
    }
}

impl ResultStore for MemoryStore {
    fn find(
        &self,
        collection: &str,
        contract: &str,
        range: PeriodRange,
    ) -> StorageResult<Vec<CachedResult>> {
        Ok(self.state.read().find(collection, contract, range))
    }

    fn insert(&self, collection: &str, result: CachedResult) -> StorageResult<()> {
        self.state.write().insert(collection, result);
        Ok(())
    }

    fn remove(&self, collection: &str, contract: &str, range: PeriodRange) -> StorageResult<usize> {
        Ok(self.state.write().remove(collection, contract, range))
    }

    fn remove_except(
        &self,
        collection: &str,
        contract: &str,
        keep: &[PeriodRange],
    ) -> StorageResult<Vec<Period>> {
        Ok(self.state.write().remove_except(collection, contract, keep))
    }

    fn sum(
        &self,
        collection: &str,
        contract: &str,
        range: PeriodRange,
    ) -> StorageResult<Option<f64>> {
        Ok(self.state.read().sum(collection, contract, range))
    }

    fn count(&self, collection: &str, contract: Option<&str>) -> StorageResult<usize> {
        Ok(self.state.read().count(collection, contract))
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        Ok(self.state.read().collections())
    }

    fn replace(&self, collection: &str, result: CachedResult) -> StorageResult<()> {
        self.state.write().replace(collection, result);
        Ok(())
    }
}

impl ErrorStore for MemoryStore {
    fn has_error(&self, record: &ErrorRecord) -> StorageResult<bool> {
        Ok(self.state.read().has_error(record))
    }

    fn record_error(&self, record: ErrorRecord) -> StorageResult<()> {
        self.state.write().errors.push(record);
        Ok(())
    }

    fn find_errors(&self, query: &ErrorQuery) -> StorageResult<Vec<ErrorRecord>> {
        Ok(self.state.read().find_errors(query))
    }

    fn count_errors(&self, query: &ErrorQuery) -> StorageResult<usize> {
        Ok(self.state.read().count_errors(query))
    }

    fn remove_errors(&self, query: &ErrorQuery) -> StorageResult<usize> {
        Ok(self.state.write().remove_errors(query))
    }

    fn record_unique(&self, record: ErrorRecord) -> StorageResult<bool> {
        let mut state = self.state.write();
        if state.has_error(&record) {
            return Ok(false);
        }
        state.errors.push(record);
        Ok(true)
    }
}
