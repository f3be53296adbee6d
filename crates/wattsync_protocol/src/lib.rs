//! # wattsync protocol
//!
//! Shared types for the wattsync reconciliation stack.
//!
//! This crate provides:
//! - `EntityClass` / `EntityRef` for the synchronizable entities
//! - `VersionTag` and `Marker` for optimistic concurrency and sync cursors
//! - `PushState` for the per-entity push state machine
//! - `RemoteError` for the remote store failure taxonomy
//! - `CachedResult`, `Period` and `ErrorRecord` for cache validation
//! - `deep_merge` for patching JSON documents
//!
//! This is a pure types crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod entity;
mod error;
mod merge;
mod push;
mod record;
mod remote;
mod result;

pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::{EntityClass, EntityRef, Marker, VersionTag};
pub use error::{ProtocolError, ProtocolResult};
pub use merge::deep_merge;
pub use push::PushState;
pub use record::{DateMatch, Drift, ErrorKind, ErrorQuery, ErrorRecord};
pub use remote::{Ack, ListQuery, RemoteError, RemoteRecord, RemoteResult, SortOrder, UPDATED_FIELD};
pub use result::{CachedResult, Granularity, Period, PeriodRange, HIDDEN_KEYS};
