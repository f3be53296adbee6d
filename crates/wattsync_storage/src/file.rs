//! File-backed store for persistent caches.

use crate::error::{StorageError, StorageResult};
use crate::memory::Collections;
use crate::store::{ErrorStore, ResultStore};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use wattsync_protocol::{CachedResult, ErrorQuery, ErrorRecord, Period, PeriodRange};

/// A store persisted as a single JSON snapshot.
///
/// The snapshot is loaded on open and rewritten after every mutation using
/// write-then-rename, so a crash leaves either the old or the new snapshot.
/// A sibling `.lock` file is held exclusively for the lifetime of the
/// store; a second open of the same path fails with
/// [`StorageError::Locked`].
///
/// A failed write leaves the in-memory state untouched.
///
/// # Example
///
/// ```no_run
/// use wattsync_protocol::{CachedResult, Period};
/// use wattsync_storage::{FileStore, ResultStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("cache.json")).unwrap();
/// let period: Period = "202301".parse().unwrap();
/// store.replace("ot101", CachedResult::new("C1", period, 42.0)).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: RwLock<Collections>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere, or if an existing
    /// snapshot cannot be read or decoded.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = sibling(path, "lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        let state = if path.exists() {
            let bytes = fs::read(path)?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                Collections::default()
            } else {
                serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::Corrupted(format!("{}: {e}", path.display())))?
            }
        } else {
            Collections::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(state),
            _lock_file: lock_file,
        })
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `change` to a copy of the state, persists it, then commits.
    fn mutate<R>(&self, change: impl FnOnce(&mut Collections) -> R) -> StorageResult<R> {
        let mut state = self.state.write();
        let mut next = state.clone();
        let out = change(&mut next);
        self.persist(&next)?;
        *state = next;
        Ok(out)
    }

    fn persist(&self, state: &Collections) -> StorageResult<()> {
        let temp_path = sibling(&self.path, "tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, state)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

impl ResultStore for FileStore {
    fn find(
        &self,
        collection: &str,
        contract: &str,
        range: PeriodRange,
    ) -> StorageResult<Vec<CachedResult>> {
        Ok(self.state.read().find(collection, contract, range))
    }

    fn insert(&self, collection: &str, result: CachedResult) -> StorageResult<()> {
        self.mutate(|s| s.insert(collection, result))
    }

    fn remove(&self, collection: &str, contract: &str, range: PeriodRange) -> StorageResult<usize> {
        self.mutate(|s| s.remove(collection, contract, range))
    }

    fn remove_except(
        &self,
        collection: &str,
        contract: &str,
        keep: &[PeriodRange],
    ) -> StorageResult<Vec<Period>> {
        self.mutate(|s| s.remove_except(collection, contract, keep))
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
        self.mutate(|s| s.replace(collection, result))
    }
}

impl ErrorStore for FileStore {
    fn has_error(&self, record: &ErrorRecord) -> StorageResult<bool> {
        Ok(self.state.read().has_error(record))
    }

    fn record_error(&self, record: ErrorRecord) -> StorageResult<()> {
        self.mutate(|s| s.errors.push(record))
    }

    fn find_errors(&self, query: &ErrorQuery) -> StorageResult<Vec<ErrorRecord>> {
        Ok(self.state.read().find_errors(query))
    }

    fn count_errors(&self, query: &ErrorQuery) -> StorageResult<usize> {
        Ok(self.state.read().count_errors(query))
    }

    fn remove_errors(&self, query: &ErrorQuery) -> StorageResult<usize> {
        self.mutate(|s| s.remove_errors(query))
    }

    fn record_unique(&self, record: ErrorRecord) -> StorageResult<bool> {
        self.mutate(|s| {
            if s.has_error(&record) {
                false
            } else {
                s.errors.push(record);
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;
    use wattsync_protocol::ErrorKind;

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let today = NaiveDate::from_ymd_opt(2023, 5, 1).unwrap();

        {
            let store = FileStore::open(&path).unwrap();
            store
                .replace("ot101", CachedResult::new("C1", p("202301"), 12.5))
                .unwrap();
            store
                .record_error(ErrorRecord::new(
                    "ot101",
                    "C1",
                    p("202302"),
                    ErrorKind::NoResult,
                    today,
                ))
                .unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        let rows = store.find("ot101", "C1", PeriodRange::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 12.5);
        assert_eq!(store.count_errors(&ErrorQuery::all()).unwrap(), 1);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let _store = FileStore::open(&path).unwrap();
        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StorageError::Locked(_))));
    }

    #[test]
    fn corrupted_snapshot_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, b"{not json").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn empty_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, b"").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.collections().unwrap().is_empty());
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let store = FileStore::open(&path).unwrap();
        store
            .insert("ot503", CachedResult::new("C1", p("20230101"), 1.0))
            .unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }
}
