//! Inspect command implementation.

use super::{open_store, CommandResult};
use serde::Serialize;
use std::path::Path;
use wattsync_protocol::{ErrorKind, ErrorQuery};
use wattsync_storage::{ErrorStore, ResultStore};

/// Cache inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Snapshot size in bytes.
    pub size: u64,
    /// Row count per collection.
    pub collections: Vec<CollectionStats>,
    /// Recorded error count per kind.
    pub errors: Vec<(String, usize)>,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Result class code.
    pub name: String,
    /// Number of cached rows.
    pub rows: usize,
}

/// Collects statistics for the store at `path`.
pub fn execute(path: &Path) -> CommandResult<InspectResult> {
    if !path.exists() {
        return Err(format!("No cache store found at {:?}", path).into());
    }
    let size = std::fs::metadata(path)?.len();
    let store = open_store(path)?;

    let collections = store
        .collections()?
        .into_iter()
        .map(|name| -> CommandResult<CollectionStats> {
            let rows = store.count(&name, None)?;
            Ok(CollectionStats { name, rows })
        })
        .collect::<CommandResult<Vec<_>>>()?;

    let errors = ErrorKind::ALL
        .into_iter()
        .map(|kind| -> CommandResult<(String, usize)> {
            let count = store.count_errors(&ErrorQuery::all().kind(kind))?;
            Ok((kind.label().to_string(), count))
        })
        .collect::<CommandResult<Vec<_>>>()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        size,
        collections,
        errors,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult<()> {
    let result = execute(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("wattsync Cache Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.size));
    println!();
    println!("Collections:");
    if result.collections.is_empty() {
        println!("  (none)");
    }
    for col in &result.collections {
        println!("  {}: {} rows", col.name, col.rows);
    }
    println!();
    println!("Recorded errors:");
    for (label, count) in &result.errors {
        println!("  {label}: {count}");
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wattsync_protocol::CachedResult;
    use wattsync_storage::FileStore;

    #[test]
    fn missing_store_is_reported() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        assert!(execute(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn counts_rows_per_collection() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("cache.json");
        {
            let store = FileStore::open(&path).unwrap();
            for month in ["202301", "202302"] {
                store
                    .insert("ot101", CachedResult::new("C1", month.parse().unwrap(), 1.0))
                    .unwrap();
            }
            store
                .insert("ot503", CachedResult::new("C1", "20230101".parse().unwrap(), 1.0))
                .unwrap();
        }

        let result = execute(&path).unwrap();
        let rows: Vec<_> = result
            .collections
            .iter()
            .map(|c| (c.name.as_str(), c.rows))
            .collect();
        assert_eq!(rows, vec![("ot101", 2), ("ot503", 1)]);
        assert!(result.errors.iter().all(|(_, n)| *n == 0));
        assert_eq!(format_size(10), "10 bytes");
    }
}
