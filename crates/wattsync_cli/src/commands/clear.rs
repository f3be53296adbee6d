//! Clear command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use wattsync_cache::{ErrorReporter, ReportFilter};

/// Deletes the errors matching `filter`, returning how many were removed.
pub fn execute(path: &Path, filter: &ReportFilter) -> CommandResult<usize> {
    let store = open_store(path)?;
    Ok(ErrorReporter::new(store).clear(filter)?)
}

/// Runs the clear command.
pub fn run(path: &Path, filter: &ReportFilter) -> CommandResult<()> {
    let removed = execute(path, filter)?;
    println!("Removed {removed} error entries");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wattsync_cache::ReportDate;
    use wattsync_protocol::{ErrorKind, ErrorRecord};
    use wattsync_storage::{ErrorStore, FileStore};

    #[test]
    fn clear_is_scoped_and_persisted() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("cache.json");
        let day = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap();
        {
            let store = Arc::new(FileStore::open(&path).unwrap());
            for (class, contract) in [("ot101", "C1"), ("ot101", "C2"), ("ot503", "C1")] {
                store
                    .record_error(ErrorRecord::new(
                        class,
                        contract,
                        "202301".parse().unwrap(),
                        ErrorKind::WrongValue,
                        day,
                    ))
                    .unwrap();
            }
        }

        let filter = ReportFilter::today()
            .class("ot101")
            .contract("C1")
            .date(ReportDate::On(day));
        assert_eq!(execute(&path, &filter).unwrap(), 1);

        let store = FileStore::open(&path).unwrap();
        let left = store
            .count_errors(&wattsync_protocol::ErrorQuery::all())
            .unwrap();
        assert_eq!(left, 2);
    }
}
