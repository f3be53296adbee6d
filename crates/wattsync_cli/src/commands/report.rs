//! Report command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use wattsync_cache::{ErrorReport, ErrorReporter, ReportFilter};

/// Builds the report for `filter`.
pub fn execute(path: &Path, filter: &ReportFilter) -> CommandResult<ErrorReport> {
    let store = open_store(path)?;
    Ok(ErrorReporter::new(store).report(filter)?)
}

/// Runs the report command.
pub fn run(path: &Path, filter: &ReportFilter) -> CommandResult<()> {
    let report = execute(path, filter)?;
    print!("{report}");
    Ok(())
}
