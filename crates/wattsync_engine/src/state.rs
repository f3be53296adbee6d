//! Sync engine: detection, planning and dispatch per entity class.

use crate::config::SyncConfig;
use crate::cursor::{CursorBackend, CursorStore};
use crate::detector::{ChangeDetector, DetectOptions};
use crate::dispatcher::{plan_jobs, Pusher};
use crate::error::{SyncError, SyncResult};
use crate::pool::{JobStatus, PoolReport, WorkerPool};
use crate::registry::Registry;
use crate::remote::RemoteStore;
use crate::source::{EntityMapper, RecordSource};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use wattsync_protocol::{Clock, EntityClass, PushState, SystemClock};

/// The current state of one entity class in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Computing the candidate set.
    Detecting,
    /// Running jobs.
    Dispatching,
    /// The last pass completed without failures.
    Synced,
    /// The last pass failed or left failures behind.
    Error,
    /// Waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Detecting | SyncState::Dispatching)
    }

    /// Returns true if a new pass can start.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Statistics about sync passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes completed.
    pub cycles_completed: u64,
    /// Candidates detected.
    pub entities_detected: u64,
    /// Jobs dispatched.
    pub jobs_dispatched: u64,
    /// Units acknowledged by the remote store.
    pub units_acked: u64,
    /// Version conflicts encountered.
    pub conflicts_encountered: u64,
    /// Units, jobs and entities that failed.
    pub failures: u64,
    /// Retried passes.
    pub retries: u64,
    /// Last completed pass.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one pass over an entity class.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Entity class.
    pub class: EntityClass,
    /// Entities examined by detection.
    pub examined: usize,
    /// Candidates detected.
    pub detected: usize,
    /// Entities detection could not examine.
    pub detection_failures: usize,
    /// Jobs dispatched.
    pub jobs: usize,
    /// Units acknowledged.
    pub acked: usize,
    /// Units rejected with a version conflict.
    pub conflicts: usize,
    /// Units that failed.
    pub failed: usize,
    /// Jobs that hit their timeout.
    pub timed_out: usize,
    /// Jobs that never started.
    pub skipped: usize,
    /// Cursors advanced.
    pub committed: usize,
    /// True if nothing failed.
    pub success: bool,
    /// True if re-running the pass may fix some failure.
    pub retryable: bool,
    /// Duration of the pass.
    pub duration: Duration,
}

/// External collaborators an engine is wired with.
pub struct Collaborators {
    /// System of record.
    pub source: Arc<dyn RecordSource>,
    /// Cursor persistence.
    pub cursors: Arc<dyn CursorBackend>,
    /// Entity to wire-format mapping.
    pub mapper: Arc<dyn EntityMapper>,
    /// Remote resource per entity class.
    pub remotes: Registry<Arc<dyn RemoteStore>>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Bundles collaborators with the wall clock.
    pub fn new(
        source: Arc<dyn RecordSource>,
        cursors: Arc<dyn CursorBackend>,
        mapper: Arc<dyn EntityMapper>,
        remotes: Registry<Arc<dyn RemoteStore>>,
    ) -> Self {
        Self {
            source,
            cursors,
            mapper,
            remotes,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Keeps the remote store in sync with the system of record.
///
/// Each entity class is reconciled independently: passes over different
/// classes may run concurrently, a second pass over a busy class is
/// rejected.
pub struct SyncEngine {
    config: SyncConfig,
    detector: ChangeDetector,
    pool: WorkerPool,
    states: RwLock<HashMap<EntityClass, SyncState>>,
    stats: RwLock<SyncStats>,
    cancels: RwLock<HashMap<EntityClass, Arc<AtomicBool>>>,
}

impl SyncEngine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the configuration is unusable.
    pub fn new(config: SyncConfig, parts: Collaborators) -> SyncResult<Self> {
        config.validate()?;

        let cursors = Arc::new(CursorStore::new(parts.cursors));
        let remotes = Arc::new(parts.remotes);
        let detector = ChangeDetector::new(
            parts.source,
            cursors.clone(),
            remotes.clone(),
            parts.clock,
            config.history(),
        );
        let pusher = Arc::new(Pusher::new(remotes, parts.mapper));
        let pool = WorkerPool::new(config.workers.clone(), pusher, cursors);

        Ok(Self {
            config,
            detector,
            pool,
            states: RwLock::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
            cancels: RwLock::new(HashMap::new()),
        })
    }

    /// Gets the state of `class`.
    pub fn state(&self, class: EntityClass) -> SyncState {
        self.states.read().get(&class).copied().unwrap_or(SyncState::Idle)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Cancels every running pass; jobs not yet started are skipped.
    pub fn cancel(&self) {
        for flag in self.cancels.read().values() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Cancels the running pass over `class`, if any.
    pub fn cancel_class(&self, class: EntityClass) {
        if let Some(flag) = self.cancels.read().get(&class) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn set_state(&self, class: EntityClass, state: SyncState) {
        self.states.write().insert(class, state);
    }

    fn was_cancelled(&self, class: EntityClass) -> bool {
        self.cancels
            .read()
            .get(&class)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Moves `class` into `Detecting` if no pass is running for it.
    ///
    /// Returns the cancellation flag of the new pass.
    fn begin(&self, class: EntityClass) -> SyncResult<Arc<AtomicBool>> {
        let mut states = self.states.write();
        let current = states.get(&class).copied().unwrap_or(SyncState::Idle);
        if !current.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{current:?}"),
                to: "sync".into(),
            });
        }
        states.insert(class, SyncState::Detecting);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.cancels.write().insert(class, cancelled.clone());
        Ok(cancelled)
    }

    fn handle_error(&self, class: EntityClass, error: &SyncError) {
        self.set_state(class, SyncState::Error);
        let mut stats = self.stats.write();
        stats.failures += 1;
        stats.last_error = Some(error.to_string());
    }

    /// Runs one detection and dispatch pass over `class`.
    ///
    /// Per-entity and per-job failures are reported in the result; an
    /// error is returned only when the pass itself could not run.
    pub async fn sync_class(
        &self,
        class: EntityClass,
        options: &DetectOptions,
    ) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        let cancelled = self.begin(class)?;

        let detector = self.detector.clone();
        let detect_options = options.clone();
        let detected = tokio::task::spawn_blocking(move || detector.detect(class, &detect_options))
            .await
            .map_err(|e| SyncError::source(format!("detection task failed: {e}")))
            .and_then(|report| report);
        let report = match detected {
            Ok(report) => report,
            Err(e) => {
                self.handle_error(class, &e);
                return Err(e);
            }
        };

        if cancelled.load(Ordering::SeqCst) {
            let e = SyncError::Cancelled;
            self.handle_error(class, &e);
            return Err(e);
        }

        let examined = report.examined;
        let candidates = report.candidates.len();
        let detection_failures = report.failures.len();
        let detection_retryable = report.failures.iter().any(|f| f.error.is_retryable());

        self.set_state(class, SyncState::Dispatching);
        let jobs = plan_jobs(report, self.config.bucket_size);
        let job_count = jobs.len();
        let pool_report = self.pool.run(jobs, cancelled).await;

        let result = cycle_result(
            class,
            examined,
            candidates,
            detection_failures,
            detection_retryable,
            job_count,
            &pool_report,
            start.elapsed(),
        );

        self.set_state(
            class,
            if result.success {
                SyncState::Synced
            } else {
                SyncState::Error
            },
        );
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.entities_detected += result.detected as u64;
            stats.jobs_dispatched += result.jobs as u64;
            stats.units_acked += result.acked as u64;
            stats.conflicts_encountered += result.conflicts as u64;
            stats.failures +=
                (result.failed + result.detection_failures + result.timed_out) as u64;
            stats.last_sync_time = Some(Instant::now());
            if result.success {
                stats.last_error = None;
            } else {
                stats.last_error = Some(format!("{class}: pass finished with failures"));
            }
        }

        info!(
            class = %class,
            detected = result.detected,
            jobs = result.jobs,
            acked = result.acked,
            conflicts = result.conflicts,
            failed = result.failed,
            timed_out = result.timed_out,
            elapsed_ms = result.duration.as_millis() as u64,
            "sync pass finished"
        );
        Ok(result)
    }

    /// Runs passes over `class` until nothing retryable is left.
    pub async fn sync_with_retry(
        &self,
        class: EntityClass,
        options: &DetectOptions,
    ) -> SyncResult<SyncCycleResult> {
        let retry = &self.config.retry;
        let mut pass = 0;

        loop {
            if pass > 0 {
                self.set_state(class, SyncState::RetryWait);
                tokio::time::sleep(retry.pause_before(pass)).await;
                if self.was_cancelled(class) {
                    return Err(SyncError::Cancelled);
                }
                self.stats.write().retries += 1;
            }
            let last = retry.is_last(pass);

            match self.sync_class(class, options).await {
                Ok(result) if result.retryable && !last => {
                    warn!(class = %class, pass, "retryable failures, re-running pass");
                }
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && !last => {
                    warn!(class = %class, pass, error = %e, "pass failed, retrying");
                }
                Err(e) => return Err(e),
            }
            pass += 1;
        }
    }

    /// Runs one pass per entity class, in dispatch order.
    pub async fn sync_all(
        &self,
        options: &DetectOptions,
    ) -> Vec<(EntityClass, SyncResult<SyncCycleResult>)> {
        let mut results = Vec::new();
        for class in EntityClass::ALL {
            results.push((class, self.sync_class(class, options).await));
        }
        results
    }
}

#[allow(clippy::too_many_arguments)]
fn cycle_result(
    class: EntityClass,
    examined: usize,
    detected: usize,
    detection_failures: usize,
    detection_retryable: bool,
    jobs: usize,
    pool: &PoolReport,
    duration: Duration,
) -> SyncCycleResult {
    let timed_out = pool.with_status(&JobStatus::TimedOut);
    let crashed = pool
        .jobs
        .iter()
        .filter(|j| matches!(j.status, JobStatus::Crashed(_)))
        .count();
    let failed = pool.units(PushState::Failed) + crashed;
    let conflicts = pool.units(PushState::Conflict);
    let skipped = pool.skipped();
    let clean = pool.jobs.iter().all(|j| j.is_clean());

    SyncCycleResult {
        class,
        examined,
        detected,
        detection_failures,
        jobs,
        acked: pool.units(PushState::Acked),
        conflicts,
        failed,
        timed_out,
        skipped,
        committed: pool.committed(),
        success: detection_failures == 0 && clean,
        retryable: detection_retryable || pool.has_retryable_failures(),
        duration,
    }
}
