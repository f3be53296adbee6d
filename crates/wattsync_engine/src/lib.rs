//! # wattsync engine
//!
//! Keeps a remote ingestion service in sync with a local system of record.
//!
//! This crate provides:
//! - Per-entity cursors that only advance on confirmed acknowledgments
//! - Change detection against cursors and remote version tags
//! - Batching of candidates into jobs
//! - Bounded-concurrency dispatch with per-job timeouts
//! - Retry with exponential backoff
//! - Remote store abstraction with in-memory and HTTP implementations
//!
//! ## Architecture
//!
//! One pass over an entity class runs:
//! 1. Detect candidates (cursor, remote probe, component write stamps)
//! 2. Plan jobs (bucketed upserts, per-entity modification chains, series batches)
//! 3. Run jobs on the worker pool
//! 4. Commit cursors for acknowledged units only
//!
//! ## Key Invariants
//!
//! - A cursor never moves past an unconfirmed point
//! - Successive updates of one entity are pushed in order, never in parallel
//! - Conflicts are reported, never overwritten
//! - Pushing an unchanged entity twice leaves one remote record

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batcher;
mod config;
mod cursor;
mod detector;
mod digest;
mod dispatcher;
mod error;
mod http;
mod pool;
mod registry;
mod remote;
mod source;
mod state;

pub use batcher::Batcher;
pub use config::{
    RetryConfig, SyncConfig, WorkerConfig, DEFAULT_BUCKET_SIZE, DEFAULT_HISTORY_DAYS,
    DEFAULT_JOB_TIMEOUT, DEFAULT_RETRY_PAUSE,
};
pub use cursor::{Cursor, CursorBackend, CursorCommit, CursorStore, MemoryCursorBackend};
pub use detector::{
    Candidate, ChangeDetector, DetectOptions, DetectionFailure, DetectionReport,
};
pub use digest::fingerprint;
pub use dispatcher::{plan_jobs, Job, JobOutcome, PushUnit, Pusher, UnitOutcome};
pub use error::{SyncError, SyncResult};
pub use http::{parse_updated, HttpClient, HttpMethod, HttpRemote, HttpRequest, HttpResponse};
pub use pool::{JobReport, JobStatus, PoolReport, SkipReason, WorkerPool};
pub use registry::Registry;
pub use remote::{MemoryRemote, RemoteCalls, RemoteStore};
pub use source::{ComponentStamp, EntityMapper, RecordSource, SeriesPoint, SourceEntity, Targets};
pub use state::{Collaborators, SyncCycleResult, SyncEngine, SyncState, SyncStats};
