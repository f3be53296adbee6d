//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::str::FromStr;
use std::time::Duration;

/// Default number of entities or points per job.
pub const DEFAULT_BUCKET_SIZE: usize = 500;

/// Default wall-clock budget of a single job.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default history window for series with no cursor, in days.
pub const DEFAULT_HISTORY_DAYS: u32 = 365;

/// Configuration for detection and dispatch.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of entities (or series points) per job.
    pub bucket_size: usize,
    /// How far back a series with no cursor is pushed, in days.
    pub history_days: u32,
    /// Worker pool configuration.
    pub workers: WorkerConfig,
    /// Retry configuration for whole class passes.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            history_days: DEFAULT_HISTORY_DAYS,
            workers: WorkerConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Loads a configuration from `PREFIX_*` environment variables.
    ///
    /// Recognized keys: `BUCKET_SIZE`, `WORKERS`, `JOB_TIMEOUT_SECS`,
    /// `HISTORY_DAYS`, `RETRY_PASSES`, `RETRY_PAUSE_SECS`. Missing keys keep
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if a value cannot be parsed or is zero
    /// where zero is meaningless.
    pub fn from_env(prefix: &str) -> SyncResult<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Loads a configuration through an arbitrary key lookup.
    pub fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> SyncResult<Self> {
        let read = |name: &str| lookup(&format!("{prefix}_{name}"));
        let mut config = Self::new();

        if let Some(raw) = read("BUCKET_SIZE") {
            config.bucket_size = parse_positive("BUCKET_SIZE", &raw)?;
        }
        if let Some(raw) = read("WORKERS") {
            config.workers.concurrency = parse_positive("WORKERS", &raw)?;
        }
        if let Some(raw) = read("JOB_TIMEOUT_SECS") {
            config.workers.job_timeout =
                Duration::from_secs(parse_positive("JOB_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = read("HISTORY_DAYS") {
            config.history_days = parse_positive("HISTORY_DAYS", &raw)?;
        }
        if let Some(raw) = read("RETRY_PASSES") {
            config.retry.max_passes = parse_positive("RETRY_PASSES", &raw)?;
        }
        if let Some(raw) = read("RETRY_PAUSE_SECS") {
            config.retry.pause = Duration::from_secs(parse_positive("RETRY_PAUSE_SECS", &raw)?);
        }

        Ok(config)
    }

    /// Sets the bucket size.
    pub fn with_bucket_size(mut self, size: usize) -> Self {
        self.bucket_size = size;
        self
    }

    /// Sets the history window in days.
    pub fn with_history_days(mut self, days: u32) -> Self {
        self.history_days = days;
        self
    }

    /// Sets the worker configuration.
    pub fn with_workers(mut self, workers: WorkerConfig) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the history window as a duration.
    pub fn history(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.history_days))
    }

    /// Checks values that would make dispatch loop or stall.
    pub fn validate(&self) -> SyncResult<()> {
        if self.bucket_size == 0 {
            return Err(SyncError::Config("bucket_size must be positive".into()));
        }
        if self.workers.concurrency == 0 {
            return Err(SyncError::Config("worker concurrency must be positive".into()));
        }
        if self.retry.max_passes == 0 {
            return Err(SyncError::Config("retry max_passes must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_positive<T>(name: &str, raw: &str) -> SyncResult<T>
where
    T: FromStr + PartialEq + Default,
{
    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| SyncError::Config(format!("{name}: cannot parse {raw:?}")))?;
    if value == T::default() {
        return Err(SyncError::Config(format!("{name}: must be positive")));
    }
    Ok(value)
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of jobs running at once.
    pub concurrency: usize,
    /// Wall-clock budget of one job.
    pub job_timeout: Duration,
}

impl WorkerConfig {
    /// Sets the concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

/// How [`SyncEngine::sync_with_retry`](crate::SyncEngine::sync_with_retry)
/// repeats a class pass that left retryable failures.
///
/// Every retry is a fresh detect-and-dispatch pass. Units acknowledged by an
/// earlier pass have advanced their cursors and are not detected again, so a
/// retry only carries what is still outstanding. The pause before each retry
/// doubles, capped at `max_pause`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Passes per class, including the first.
    pub max_passes: u32,
    /// Pause before the first retry.
    pub pause: Duration,
    /// Longest pause between passes.
    pub max_pause: Duration,
}

/// Default pause before the first retry of a class pass.
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(30);

impl RetryConfig {
    /// Allows up to `max_passes` passes per class.
    pub fn new(max_passes: u32) -> Self {
        Self {
            max_passes,
            pause: DEFAULT_RETRY_PAUSE,
            max_pause: Duration::from_secs(600),
        }
    }

    /// A single pass, never retried.
    pub fn single_pass() -> Self {
        Self {
            max_passes: 1,
            pause: Duration::ZERO,
            max_pause: Duration::ZERO,
        }
    }

    /// Sets the pause before the first retry.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Sets the longest pause.
    pub fn with_max_pause(mut self, pause: Duration) -> Self {
        self.max_pause = pause;
        self
    }

    /// Pause before pass `pass` (0-indexed; the first pass starts at once).
    pub fn pause_before(&self, pass: u32) -> Duration {
        if pass == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(pass - 1).unwrap_or(u32::MAX);
        self.pause.saturating_mul(factor).min(self.max_pause)
    }

    /// Returns true if `pass` (0-indexed) is the last one allowed.
    pub fn is_last(&self, pass: u32) -> bool {
        pass + 1 >= self.max_passes
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.bucket_size, 500);
        assert_eq!(config.history_days, 365);
        assert_eq!(config.workers.job_timeout, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new()
            .with_bucket_size(50)
            .with_history_days(30)
            .with_workers(WorkerConfig::default().with_concurrency(8));

        assert_eq!(config.bucket_size, 50);
        assert_eq!(config.history(), chrono::Duration::days(30));
        assert_eq!(config.workers.concurrency, 8);
    }

    #[test]
    fn loads_from_lookup() {
        let config = SyncConfig::from_lookup(
            "WATTSYNC",
            lookup(&[
                ("WATTSYNC_BUCKET_SIZE", "100"),
                ("WATTSYNC_WORKERS", " 2 "),
                ("WATTSYNC_JOB_TIMEOUT_SECS", "60"),
                ("WATTSYNC_HISTORY_DAYS", "90"),
                ("WATTSYNC_RETRY_PASSES", "5"),
                ("WATTSYNC_RETRY_PAUSE_SECS", "10"),
                ("OTHER_BUCKET_SIZE", "7"),
            ]),
        )
        .unwrap();

        assert_eq!(config.bucket_size, 100);
        assert_eq!(config.workers.concurrency, 2);
        assert_eq!(config.workers.job_timeout, Duration::from_secs(60));
        assert_eq!(config.history_days, 90);
        assert_eq!(config.retry.max_passes, 5);
        assert_eq!(config.retry.pause, Duration::from_secs(10));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = SyncConfig::from_lookup("W", lookup(&[("W_BUCKET_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let err = SyncConfig::from_lookup("W", lookup(&[("W_WORKERS", "0")])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn zero_bucket_is_invalid() {
        assert!(SyncConfig::new().with_bucket_size(0).validate().is_err());
    }

    #[test]
    fn pause_doubles_between_passes() {
        let retry = RetryConfig::new(5).with_pause(Duration::from_secs(30));

        assert_eq!(retry.pause_before(0), Duration::ZERO);
        assert_eq!(retry.pause_before(1), Duration::from_secs(30));
        assert_eq!(retry.pause_before(3), Duration::from_secs(120));
        assert!(!retry.is_last(3));
        assert!(retry.is_last(4));
    }

    #[test]
    fn pause_is_capped() {
        let retry = RetryConfig::new(40)
            .with_pause(Duration::from_secs(1))
            .with_max_pause(Duration::from_secs(5));

        assert_eq!(retry.pause_before(4), Duration::from_secs(5));
        assert_eq!(retry.pause_before(39), Duration::from_secs(5));
        assert!(RetryConfig::single_pass().is_last(0));
    }

    #[test]
    fn zero_passes_is_invalid() {
        let config = SyncConfig::new().with_retry(RetryConfig::new(0));
        assert!(config.validate().is_err());
    }
}
