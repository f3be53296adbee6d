//! Bounded-concurrency execution of jobs with per-job timeouts.

use crate::config::WorkerConfig;
use crate::cursor::{CursorCommit, CursorStore};
use crate::dispatcher::{Job, JobOutcome, Pusher};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wattsync_protocol::{EntityClass, PushState};

/// Why a job was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The pool was cancelled before the job started.
    Cancelled,
    /// An earlier job in the same lane did not fully succeed.
    LaneBlocked,
}

/// Final status of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// The job ran to completion within its timeout.
    Completed,
    /// The job exceeded its timeout and was stopped; nothing it did was
    /// committed.
    TimedOut,
    /// The job panicked.
    Crashed(String),
    /// The job never started.
    Skipped(SkipReason),
}

/// What happened to one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    /// Job identifier.
    pub job_id: Uuid,
    /// Entity class.
    pub class: EntityClass,
    /// Ordered lane the job ran in.
    pub lane: String,
    /// Final status.
    pub status: JobStatus,
    /// Per-unit results, when the job completed.
    pub outcome: Option<JobOutcome>,
    /// Number of cursors that advanced.
    pub committed: usize,
    /// Cursor writes that failed.
    pub commit_errors: Vec<String>,
}

impl JobReport {
    fn new(job: &Job, lane: &str, status: JobStatus) -> Self {
        Self {
            job_id: job.id,
            class: job.class,
            lane: lane.to_string(),
            status,
            outcome: None,
            committed: 0,
            commit_errors: Vec::new(),
        }
    }

    /// Returns true if the job completed and every unit was acknowledged.
    pub fn is_clean(&self) -> bool {
        self.status == JobStatus::Completed
            && self.commit_errors.is_empty()
            && self.outcome.as_ref().is_some_and(JobOutcome::is_success)
    }

    /// Returns true if re-running the pass may fix this job.
    pub fn is_retryable(&self) -> bool {
        match &self.status {
            JobStatus::TimedOut => true,
            JobStatus::Completed => self
                .outcome
                .as_ref()
                .is_some_and(|o| o.units.iter().any(|u| u.retryable)),
            JobStatus::Crashed(_) | JobStatus::Skipped(_) => false,
        }
    }
}

/// Aggregate of one pool run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolReport {
    /// Per-job reports, in completion order.
    pub jobs: Vec<JobReport>,
}

impl PoolReport {
    /// Counts units in `state` across completed jobs.
    pub fn units(&self, state: PushState) -> usize {
        self.jobs
            .iter()
            .filter_map(|j| j.outcome.as_ref())
            .map(|o| o.count(state))
            .sum()
    }

    /// Counts jobs with `status`.
    pub fn with_status(&self, status: &JobStatus) -> usize {
        self.jobs.iter().filter(|j| &j.status == status).count()
    }

    /// Counts jobs that did not start.
    pub fn skipped(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Skipped(_)))
            .count()
    }

    /// Returns true if some failure may go away on a re-run.
    pub fn has_retryable_failures(&self) -> bool {
        self.jobs.iter().any(JobReport::is_retryable)
    }

    /// Total cursors advanced.
    pub fn committed(&self) -> usize {
        self.jobs.iter().map(|j| j.committed).sum()
    }
}

#[derive(Clone)]
struct LaneContext {
    pusher: Arc<Pusher>,
    cursors: Arc<CursorStore>,
    semaphore: Arc<Semaphore>,
    cancelled: Arc<AtomicBool>,
    timeout: Duration,
}

/// Runs jobs on blocking worker threads.
///
/// Jobs sharing a lane run one after another in submission order; lanes run
/// in parallel up to the configured concurrency. A job that exceeds its
/// timeout is stopped before its next remote write and its cursor changes
/// are discarded. `run` returns only once every worker thread has stopped.
pub struct WorkerPool {
    config: WorkerConfig,
    pusher: Arc<Pusher>,
    cursors: Arc<CursorStore>,
}

impl WorkerPool {
    /// Creates a pool.
    pub fn new(config: WorkerConfig, pusher: Arc<Pusher>, cursors: Arc<CursorStore>) -> Self {
        Self {
            config,
            pusher,
            cursors,
        }
    }

    /// Runs every job and waits for all lanes to finish.
    ///
    /// Once `cancelled` is set, jobs that have not started are skipped.
    pub async fn run(&self, jobs: Vec<Job>, cancelled: Arc<AtomicBool>) -> PoolReport {
        let mut order: Vec<String> = Vec::new();
        let mut lanes: HashMap<String, Vec<Job>> = HashMap::new();
        for job in jobs {
            let lane = job.lane();
            if !lanes.contains_key(&lane) {
                order.push(lane.clone());
            }
            lanes.entry(lane).or_default().push(job);
        }

        info!(
            lanes = order.len(),
            concurrency = self.config.concurrency,
            "starting worker pool"
        );

        let ctx = LaneContext {
            pusher: self.pusher.clone(),
            cursors: self.cursors.clone(),
            semaphore: Arc::new(Semaphore::new(self.config.concurrency.max(1))),
            cancelled,
            timeout: self.config.job_timeout,
        };

        let mut set = JoinSet::new();
        for lane in order {
            let jobs = lanes.remove(&lane).unwrap_or_default();
            set.spawn(run_lane(ctx.clone(), lane, jobs));
        }

        let mut report = PoolReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(reports) => report.jobs.extend(reports),
                Err(e) => error!(error = %e, "lane task failed"),
            }
        }
        report
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn run_lane(ctx: LaneContext, lane: String, jobs: Vec<Job>) -> Vec<JobReport> {
    let mut reports = Vec::with_capacity(jobs.len());
    let mut blocked = false;

    for job in jobs {
        if ctx.cancelled.load(Ordering::SeqCst) {
            reports.push(skipped(&job, &lane, SkipReason::Cancelled));
            continue;
        }
        if blocked {
            debug!(job_id = %job.id, lane = %lane, "skipping job after lane failure");
            reports.push(skipped(&job, &lane, SkipReason::LaneBlocked));
            continue;
        }

        let report = run_job(&ctx, &lane, job).await;
        blocked = !report.is_clean();
        reports.push(report);
    }

    reports
}

fn skipped(job: &Job, lane: &str, reason: SkipReason) -> JobReport {
    JobReport::new(job, lane, JobStatus::Skipped(reason))
}

async fn run_job(ctx: &LaneContext, lane: &str, job: Job) -> JobReport {
    let permit = match ctx.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return skipped(&job, lane, SkipReason::Cancelled),
    };
    // Cancellation may have arrived while waiting for a worker slot.
    if ctx.cancelled.load(Ordering::SeqCst) {
        debug!(job_id = %job.id, lane, "cancelled while queued");
        return skipped(&job, lane, SkipReason::Cancelled);
    }

    info!(
        job_id = %job.id,
        class = %job.class,
        lane,
        units = job.units.len(),
        "job started"
    );
    let pusher = ctx.pusher.clone();
    let task_job = job.clone();
    let stop = Arc::new(AtomicBool::new(false));
    let task_stop = stop.clone();
    let mut handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        pusher.execute(&task_job, &task_stop)
    });

    let joined = match tokio::time::timeout(ctx.timeout, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            stop.store(true, Ordering::SeqCst);
            warn!(
                job_id = %job.id,
                timeout_ms = ctx.timeout.as_millis() as u64,
                "job timed out, stopping it and discarding its cursor changes"
            );
            if let Err(e) = handle.await {
                error!(job_id = %job.id, error = %e, "timed-out job crashed while stopping");
            }
            return JobReport::new(&job, lane, JobStatus::TimedOut);
        }
    };
    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(job_id = %job.id, error = %e, "job crashed");
            return JobReport::new(&job, lane, JobStatus::Crashed(e.to_string()));
        }
    };

    let mut report = JobReport::new(&job, lane, JobStatus::Completed);
    let commits: Vec<CursorCommit> = outcome.commits().cloned().collect();
    let cursors = ctx.cursors.clone();
    let applied = tokio::task::spawn_blocking(move || {
        commits
            .iter()
            .map(|commit| {
                cursors
                    .commit(commit)
                    .map_err(|e| format!("{}: {e}", commit.entity))
            })
            .collect::<Vec<_>>()
    })
    .await;

    match applied {
        Ok(results) => {
            for result in results {
                match result {
                    Ok(true) => report.committed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "cursor commit failed");
                        report.commit_errors.push(e);
                    }
                }
            }
        }
        Err(e) => report.commit_errors.push(e.to_string()),
    }

    report.outcome = Some(outcome);
    report
}
