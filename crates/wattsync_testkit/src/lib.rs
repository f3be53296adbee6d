//! # wattsync testkit
//!
//! Test utilities for wattsync.
//!
//! This crate provides:
//! - [`FakeSystem`], an in-memory system of record implementing the
//!   record source, cursor backend and mapper boundaries
//! - [`SyncBench`] and [`TempCache`] fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wattsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn pushes_new_contract() {
//!     let bench = SyncBench::default();
//!     bench.system.add_contract("C1", serde_json::json!({}));
//!     // ... run bench.engine
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod system;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::system::*;
}

pub use fixtures::*;
pub use generators::*;
pub use system::*;
