//! # wattsync storage
//!
//! Stores for cached remote results and validation error records.
//!
//! Stores are keyed document collections. They know how to filter by
//! contract, period range and error dimensions, delete in bulk, and sum
//! values, and nothing about reconciliation rules.
//!
//! ## Available stores
//!
//! - [`MemoryStore`] - For tests and single-process runs
//! - [`FileStore`] - A JSON snapshot on disk, guarded by an exclusive lock
//!
//! ## Example
//!
//! ```rust
//! use wattsync_protocol::{CachedResult, Period, PeriodRange};
//! use wattsync_storage::{MemoryStore, ResultStore};
//!
//! let store = MemoryStore::new();
//! let period: Period = "202301".parse().unwrap();
//! store.insert("ot101", CachedResult::new("C1", period, 42.0)).unwrap();
//! let rows = store.find("ot101", "C1", PeriodRange::all()).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{ErrorStore, ResultStore};
