//! CLI command implementations.

pub mod clear;
pub mod inspect;
pub mod report;
pub mod validate;

use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use wattsync_cache::ReportDate;
use wattsync_storage::FileStore;

/// Boxed error used by every command.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Parses `today`, `any` or an ISO date.
pub fn parse_date(raw: &str) -> Result<ReportDate, String> {
    match raw {
        "today" => Ok(ReportDate::Today),
        "any" | "all" => Ok(ReportDate::Any),
        _ => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(ReportDate::On)
            .map_err(|e| format!("invalid date {raw:?}: {e}")),
    }
}

fn open_store(path: &Path) -> CommandResult<Arc<FileStore>> {
    debug!(path = %path.display(), "opening cache store");
    Ok(Arc::new(FileStore::open(path)?))
}
