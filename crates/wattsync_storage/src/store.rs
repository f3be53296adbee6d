//! Store trait definitions.

use crate::error::StorageResult;
use wattsync_protocol::{CachedResult, ErrorQuery, ErrorRecord, Period, PeriodRange};

/// Keyed collections of cached remote results.
///
/// Each result class lives in its own named collection. Rows are keyed by
/// `(contract, period)`; a collection never holds two rows for the same key
/// when written through [`ResultStore::replace`].
///
/// # Invariants
///
/// - `find` returns rows sorted by period
/// - bulk removals return exactly the rows they deleted
/// - stores must be `Send + Sync` so workers can share one handle
pub trait ResultStore: Send + Sync {
    /// Returns the contract's rows whose period falls in `range`.
    fn find(&self, collection: &str, contract: &str, range: PeriodRange)
        -> StorageResult<Vec<CachedResult>>;

    /// Inserts a row.
    fn insert(&self, collection: &str, result: CachedResult) -> StorageResult<()>;

    /// Deletes the contract's rows whose period falls in `range`.
    ///
    /// Returns the number of deleted rows.
    fn remove(&self, collection: &str, contract: &str, range: PeriodRange) -> StorageResult<usize>;

    /// Deletes every row of the contract outside all of `keep`.
    ///
    /// Returns the periods of the deleted rows, sorted.
    fn remove_except(
        &self,
        collection: &str,
        contract: &str,
        keep: &[PeriodRange],
    ) -> StorageResult<Vec<Period>>;

    /// Sums the values of the contract's rows in `range`.
    ///
    /// Returns `None` when no row matches.
    fn sum(&self, collection: &str, contract: &str, range: PeriodRange)
        -> StorageResult<Option<f64>>;

    /// Counts rows, optionally for a single contract.
    fn count(&self, collection: &str, contract: Option<&str>) -> StorageResult<usize>;

    /// Lists collection names.
    fn collections(&self) -> StorageResult<Vec<String>>;

    /// Replaces the row for `(contract, period)` wholesale.
    ///
    /// Implementations should make the delete and insert atomic.
    fn replace(&self, collection: &str, result: CachedResult) -> StorageResult<()> {
        self.remove(
            collection,
            &result.contract_id,
            PeriodRange::exact(result.period),
        )?;
        self.insert(collection, result)
    }
}

/// Log of validation error records.
pub trait ErrorStore: Send + Sync {
    /// Returns true if an identical record is already stored.
    fn has_error(&self, record: &ErrorRecord) -> StorageResult<bool>;

    /// Appends a record.
    fn record_error(&self, record: ErrorRecord) -> StorageResult<()>;

    /// Returns matching records.
    fn find_errors(&self, query: &ErrorQuery) -> StorageResult<Vec<ErrorRecord>>;

    /// Counts matching records.
    fn count_errors(&self, query: &ErrorQuery) -> StorageResult<usize>;

    /// Deletes matching records, returning how many were removed.
    fn remove_errors(&self, query: &ErrorQuery) -> StorageResult<usize>;

    /// Appends a record unless an identical one exists.
    ///
    /// Returns true if the record was inserted.
    fn record_unique(&self, record: ErrorRecord) -> StorageResult<bool> {
        if self.has_error(&record)? {
            return Ok(false);
        }
        self.record_error(record)?;
        Ok(true)
    }
}
