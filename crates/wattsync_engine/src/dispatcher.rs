//! Turns candidates into jobs and executes them against the remote store.

use crate::batcher::Batcher;
use crate::cursor::CursorCommit;
use crate::detector::{Candidate, DetectionReport};
use crate::error::SyncError;
use crate::registry::Registry;
use crate::remote::RemoteStore;
use crate::source::{EntityMapper, SeriesPoint};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wattsync_protocol::{Ack, EntityClass, EntityRef, Marker, PushState, RemoteError, VersionTag};

/// One independently pushable piece of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum PushUnit {
    /// Write the whole document: create when `version` is `None`,
    /// otherwise update under that tag.
    Upsert {
        /// Entity to write.
        entity: EntityRef,
        /// Tag to update under.
        version: Option<VersionTag>,
    },
    /// Chained updates, each conditioned on the tag returned by the previous.
    Chain {
        /// Entity to update.
        entity: EntityRef,
        /// Tag of the first update.
        version: VersionTag,
        /// Components in push order; empty means the whole document once.
        components: Vec<u64>,
    },
    /// A batch of series points, oldest first.
    Series {
        /// Owner of the points.
        owner: EntityRef,
        /// Points to push.
        points: Vec<SeriesPoint>,
    },
}

impl PushUnit {
    /// The entity whose cursor this unit moves.
    pub fn entity(&self) -> &EntityRef {
        match self {
            PushUnit::Upsert { entity, .. } | PushUnit::Chain { entity, .. } => entity,
            PushUnit::Series { owner, .. } => owner,
        }
    }
}

/// A unit of queued work.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Job identifier, for operator visibility.
    pub id: Uuid,
    /// Entity class, which names the queue.
    pub class: EntityClass,
    /// Units to push, in order.
    pub units: Vec<PushUnit>,
}

impl Job {
    /// Creates a job with a fresh id.
    pub fn new(class: EntityClass, units: Vec<PushUnit>) -> Self {
        Self {
            id: Uuid::new_v4(),
            class,
            units,
        }
    }

    /// Key of the ordered lane this job must run in.
    ///
    /// Jobs touching a single entity share that entity's lane, so successive
    /// updates of one natural key never run in parallel.
    pub fn lane(&self) -> String {
        match self.units.as_slice() {
            [only] => only.entity().to_string(),
            _ => self.id.to_string(),
        }
    }
}

/// Splits a detection report into jobs.
///
/// - new and forced entities are grouped `bucket_size` per job
/// - each changed entity gets its own job, since its updates are chained
/// - each series is split into chronological batches of `bucket_size` points
pub fn plan_jobs(report: DetectionReport, bucket_size: usize) -> Vec<Job> {
    let class = report.class;
    let mut upserts = Vec::new();
    let mut jobs = Vec::new();

    for candidate in report.candidates {
        match candidate {
            Candidate::New { entity, .. } => upserts.push(PushUnit::Upsert {
                entity,
                version: None,
            }),
            Candidate::Forced { entity, version } => {
                upserts.push(PushUnit::Upsert { entity, version })
            }
            Candidate::Changed {
                entity,
                version,
                components,
            } => jobs.push(Job::new(
                class,
                vec![PushUnit::Chain {
                    entity,
                    version,
                    components,
                }],
            )),
            Candidate::Series { owner, points } => {
                for batch in Batcher::new(points).batches(bucket_size) {
                    jobs.push(Job::new(
                        class,
                        vec![PushUnit::Series {
                            owner: owner.clone(),
                            points: batch,
                        }],
                    ));
                }
            }
        }
    }

    let upsert_jobs = Batcher::new(upserts)
        .batches(bucket_size)
        .map(|units| Job::new(class, units));
    let mut planned: Vec<Job> = upsert_jobs.collect();
    planned.extend(jobs);
    planned
}

/// Result of pushing one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitOutcome {
    /// Entity pushed.
    pub entity: EntityRef,
    /// Terminal state, or `Pending` if the job stopped before this unit.
    pub state: PushState,
    /// Cursor change earned by acknowledged writes, applied by the pool.
    #[serde(skip)]
    pub commit: Option<CursorCommit>,
    /// Failure message.
    pub error: Option<String>,
    /// Whether re-running may succeed.
    pub retryable: bool,
}

impl UnitOutcome {
    fn pending(entity: EntityRef) -> Self {
        Self {
            entity,
            state: PushState::Pending,
            commit: None,
            error: None,
            retryable: false,
        }
    }
}

/// Result of executing one job to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    /// Job identifier.
    pub job_id: Uuid,
    /// Per-unit results, in job order.
    pub units: Vec<UnitOutcome>,
}

impl JobOutcome {
    /// Count of units in `state`.
    pub fn count(&self, state: PushState) -> usize {
        self.units.iter().filter(|u| u.state == state).count()
    }

    /// Returns true if every unit was acknowledged.
    pub fn is_success(&self) -> bool {
        self.units.iter().all(|u| u.state == PushState::Acked)
    }

    /// Cursor changes to apply once the job is known to have completed.
    pub fn commits(&self) -> impl Iterator<Item = &CursorCommit> {
        self.units.iter().filter_map(|u| u.commit.as_ref())
    }
}

/// Executes jobs synchronously against the registered remote stores.
pub struct Pusher {
    remotes: Arc<Registry<Arc<dyn RemoteStore>>>,
    mapper: Arc<dyn EntityMapper>,
}

impl Pusher {
    /// Creates a pusher.
    pub fn new(
        remotes: Arc<Registry<Arc<dyn RemoteStore>>>,
        mapper: Arc<dyn EntityMapper>,
    ) -> Self {
        Self { remotes, mapper }
    }

    /// Runs every unit of `job` in order.
    ///
    /// A transport failure stops the job: later units stay `Pending`.
    /// Conflicts and mapping failures only affect their own unit.
    ///
    /// `stop` is checked before every remote write; once it is set no
    /// further write is issued and the remaining units stay `Pending`.
    pub fn execute(&self, job: &Job, stop: &AtomicBool) -> JobOutcome {
        let start = Instant::now();
        let mut units: Vec<UnitOutcome> = job
            .units
            .iter()
            .map(|u| UnitOutcome::pending(u.entity().clone()))
            .collect();

        let remote = match self.remotes.get(job.class) {
            Ok(remote) => remote,
            Err(e) => {
                for outcome in &mut units {
                    record_error(outcome, &e, PushState::Failed);
                }
                return JobOutcome { job_id: job.id, units };
            }
        };

        for (unit, outcome) in job.units.iter().zip(units.iter_mut()) {
            if stop.load(Ordering::SeqCst) {
                warn!(job_id = %job.id, entity = %outcome.entity, "job stopped before unit");
                break;
            }
            let aborted = self.push_unit(remote.as_ref(), unit, outcome, stop);
            if aborted {
                warn!(
                    job_id = %job.id,
                    entity = %outcome.entity,
                    "transport failure, stopping job"
                );
                break;
            }
        }

        let outcome = JobOutcome { job_id: job.id, units };
        info!(
            job_id = %job.id,
            class = %job.class,
            acked = outcome.count(PushState::Acked),
            conflicts = outcome.count(PushState::Conflict),
            failed = outcome.count(PushState::Failed),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "job finished"
        );
        outcome
    }

    /// Pushes one unit. Returns true if the job must stop.
    fn push_unit(
        &self,
        remote: &dyn RemoteStore,
        unit: &PushUnit,
        outcome: &mut UnitOutcome,
        stop: &AtomicBool,
    ) -> bool {
        set_state(outcome, PushState::InFlight);

        let result = match unit {
            PushUnit::Upsert { entity, version } => self.upsert(remote, entity, version.as_ref()),
            PushUnit::Chain {
                entity,
                version,
                components,
            } => self.chain(remote, entity, version, components, stop),
            PushUnit::Series { owner, points } => self.series(remote, owner, points),
        };

        match result {
            Ok(commit) => {
                outcome.commit = Some(commit);
                set_state(outcome, PushState::Acked);
                false
            }
            Err(Partial { commit, error }) => {
                outcome.commit = commit;
                if error.is_conflict() {
                    warn!(
                        entity = %outcome.entity,
                        error = %error,
                        "version conflict, leaving for next detection pass"
                    );
                    record_error(outcome, &error, PushState::Conflict);
                } else {
                    warn!(entity = %outcome.entity, error = %error, "push failed");
                    record_error(outcome, &error, PushState::Failed);
                }
                matches!(
                    error,
                    SyncError::Remote(RemoteError::Transport { .. }) | SyncError::Timeout
                )
            }
        }
    }

    fn upsert(
        &self,
        remote: &dyn RemoteStore,
        entity: &EntityRef,
        version: Option<&VersionTag>,
    ) -> Result<CursorCommit, Partial> {
        let payload = self.mapper.entity_payload(entity, None)?;
        let ack = match version {
            Some(version) => remote.update(&entity.key, &payload, version),
            None => remote.create(&entity.key, &payload),
        }
        .map_err(SyncError::from)?;
        debug!(entity = %entity, version = %ack.version, "document written");
        Ok(version_commit(entity, &ack))
    }

    fn chain(
        &self,
        remote: &dyn RemoteStore,
        entity: &EntityRef,
        version: &VersionTag,
        components: &[u64],
        stop: &AtomicBool,
    ) -> Result<CursorCommit, Partial> {
        let steps: Vec<Option<u64>> = if components.is_empty() {
            vec![None]
        } else {
            components.iter().copied().map(Some).collect()
        };

        let mut tag = version.clone();
        let mut last_ack: Option<Ack> = None;
        for component in steps {
            if stop.load(Ordering::SeqCst) {
                return Err(Partial {
                    commit: last_ack.as_ref().map(|ack| version_commit(entity, ack)),
                    error: SyncError::Timeout,
                });
            }
            let step = self
                .mapper
                .entity_payload(entity, component)
                .and_then(|payload| {
                    remote
                        .update(&entity.key, &payload, &tag)
                        .map_err(SyncError::from)
                });
            match step {
                Ok(ack) => {
                    debug!(
                        entity = %entity,
                        component = ?component,
                        version = %ack.version,
                        "update acknowledged"
                    );
                    tag = ack.version.clone();
                    last_ack = Some(ack);
                }
                Err(error) => {
                    return Err(Partial {
                        commit: last_ack.as_ref().map(|ack| version_commit(entity, ack)),
                        error,
                    });
                }
            }
        }

        match last_ack {
            Some(ack) => Ok(version_commit(entity, &ack)),
            None => Err(SyncError::mapping(format!("{entity}: nothing to push")).into()),
        }
    }

    fn series(
        &self,
        remote: &dyn RemoteStore,
        owner: &EntityRef,
        points: &[SeriesPoint],
    ) -> Result<CursorCommit, Partial> {
        let (first, last) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(SyncError::mapping(format!("{owner}: empty series batch")).into()),
        };
        info!(
            owner = %owner,
            from = %first.at,
            to = %last.at,
            count = points.len(),
            "sending series batch"
        );

        let payload = self.mapper.series_payload(owner, points)?;
        let key = format!("{}@{}", owner.key, last.at.timestamp());
        remote.create(&key, &payload).map_err(SyncError::from)?;

        let newest = points.iter().map(|p| p.at).max().unwrap_or(last.at);
        Ok(CursorCommit {
            entity: owner.clone(),
            version: None,
            marker: Some(Marker::At(newest)),
        })
    }
}

impl std::fmt::Debug for Pusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pusher").finish_non_exhaustive()
    }
}

/// A failed unit that may still have earned a cursor change.
struct Partial {
    commit: Option<CursorCommit>,
    error: SyncError,
}

impl From<SyncError> for Partial {
    fn from(error: SyncError) -> Self {
        Self {
            commit: None,
            error,
        }
    }
}

fn version_commit(entity: &EntityRef, ack: &Ack) -> CursorCommit {
    CursorCommit {
        entity: entity.clone(),
        version: Some(ack.version.clone()),
        marker: None,
    }
}

fn set_state(outcome: &mut UnitOutcome, next: PushState) {
    match outcome.state.transition(next) {
        Ok(state) => outcome.state = state,
        Err(e) => {
            warn!(entity = %outcome.entity, error = %e, "illegal push transition");
            outcome.state = PushState::Failed;
        }
    }
}

fn record_error(outcome: &mut UnitOutcome, error: &SyncError, terminal: PushState) {
    outcome.error = Some(error.to_string());
    outcome.retryable = error.is_retryable();
    set_state(outcome, terminal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::SyncResult;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{json, Value};
    use wattsync_protocol::{ListQuery, RemoteRecord, RemoteResult};

    struct EchoMapper;

    impl EntityMapper for EchoMapper {
        fn entity_payload(&self, entity: &EntityRef, component: Option<u64>) -> SyncResult<Value> {
            if entity.key == "BROKEN" {
                return Err(SyncError::mapping("missing tariff"));
            }
            Ok(json!({"contractId": entity.key, "modification": component}))
        }

        fn series_payload(&self, owner: &EntityRef, points: &[SeriesPoint]) -> SyncResult<Value> {
            let ids: Vec<u64> = points.iter().map(|p| p.id).collect();
            Ok(json!({"deviceId": owner.key, "points": ids}))
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 2, 1, hour, 0, 0).unwrap()
    }

    fn contract(id: u64) -> EntityRef {
        EntityRef::contract(id, format!("C{id}"))
    }

    fn pusher(remote: Arc<MemoryRemote>) -> Pusher {
        let registry = Registry::new()
            .with(EntityClass::Contract, remote.clone() as Arc<dyn RemoteStore>)
            .with(EntityClass::Measurement, remote as Arc<dyn RemoteStore>);
        Pusher::new(Arc::new(registry), Arc::new(EchoMapper))
    }

    #[test]
    fn plan_groups_new_entities_and_isolates_chains() {
        let report = DetectionReport {
            class: EntityClass::Contract,
            examined: 5,
            candidates: vec![
                Candidate::New { entity: contract(1), recreate: false },
                Candidate::New { entity: contract(2), recreate: true },
                Candidate::Changed {
                    entity: contract(3),
                    version: VersionTag::new("t3"),
                    components: vec![30, 31],
                },
                Candidate::Forced { entity: contract(4), version: None },
            ],
            failures: Vec::new(),
        };

        let jobs = plan_jobs(report, 2);
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].units.len(), 2);
        assert_eq!(jobs[1].units.len(), 1);
        assert!(matches!(jobs[2].units[0], PushUnit::Chain { .. }));
        assert_eq!(jobs[2].lane(), "contract:C3");
    }

    #[test]
    fn plan_splits_series_chronologically() {
        let owner = EntityRef::new(EntityClass::Measurement, 9, "ZIV1");
        let points: Vec<SeriesPoint> = (0..5)
            .map(|h| SeriesPoint { id: h.into(), at: at(h) })
            .collect();
        let report = DetectionReport {
            class: EntityClass::Measurement,
            examined: 1,
            candidates: vec![Candidate::Series { owner, points }],
            failures: Vec::new(),
        };

        let jobs = plan_jobs(report, 2);
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.lane() == "measurement:ZIV1"));
        let PushUnit::Series { points, .. } = &jobs[2].units[0] else {
            panic!("expected series unit");
        };
        assert_eq!(points[0].id, 4);
    }

    #[test]
    fn upserts_ack_and_commit_version() {
        let remote = Arc::new(MemoryRemote::new());
        let pusher = pusher(remote.clone());
        let job = Job::new(
            EntityClass::Contract,
            vec![PushUnit::Upsert { entity: contract(1), version: None }],
        );

        let outcome = pusher.execute(&job, &AtomicBool::new(false));
        assert!(outcome.is_success());
        let commit = outcome.commits().next().unwrap();
        assert_eq!(commit.version, Some(remote.record("C1").unwrap().version));
    }

    #[test]
    fn chain_follows_returned_tags() {
        let remote = Arc::new(MemoryRemote::new());
        let created = remote.create("C1", &json!({"contractId": "C1"})).unwrap();
        let pusher = pusher(remote.clone());
        let job = Job::new(
            EntityClass::Contract,
            vec![PushUnit::Chain {
                entity: contract(1),
                version: created.version,
                components: vec![10, 11, 12],
            }],
        );

        let outcome = pusher.execute(&job, &AtomicBool::new(false));
        assert!(outcome.is_success());
        assert_eq!(remote.calls().updates, 3);
        assert_eq!(remote.record("C1").unwrap().payload["modification"], json!(12));
    }

    #[test]
    fn conflict_is_surfaced_not_forced() {
        let remote = Arc::new(MemoryRemote::new());
        remote.create("C1", &json!({"contractId": "C1"})).unwrap();
        let pusher = pusher(remote.clone());
        let job = Job::new(
            EntityClass::Contract,
            vec![
                PushUnit::Chain {
                    entity: contract(1),
                    version: VersionTag::new("stale"),
                    components: vec![10],
                },
                PushUnit::Upsert { entity: contract(2), version: None },
            ],
        );

        let outcome = pusher.execute(&job, &AtomicBool::new(false));
        assert_eq!(outcome.units[0].state, PushState::Conflict);
        assert!(outcome.units[0].commit.is_none());
        assert_eq!(outcome.units[1].state, PushState::Acked);
    }

    #[test]
    fn transport_failure_stops_job_but_keeps_earlier_acks() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_on("C2", RemoteError::transport_retryable("connection reset"));
        let pusher = pusher(remote.clone());
        let job = Job::new(
            EntityClass::Contract,
            (1..=3).map(|id| PushUnit::Upsert { entity: contract(id), version: None }).collect(),
        );

        let outcome = pusher.execute(&job, &AtomicBool::new(false));
        let states: Vec<_> = outcome.units.iter().map(|u| u.state).collect();
        assert_eq!(states, [PushState::Acked, PushState::Failed, PushState::Pending]);
        assert!(outcome.units[1].retryable);
        assert_eq!(outcome.commits().count(), 1);
    }

    #[test]
    fn mapping_failure_only_fails_its_unit() {
        let remote = Arc::new(MemoryRemote::new());
        let pusher = pusher(remote);
        let job = Job::new(
            EntityClass::Contract,
            vec![
                PushUnit::Upsert { entity: EntityRef::contract(9, "BROKEN"), version: None },
                PushUnit::Upsert { entity: contract(1), version: None },
            ],
        );

        let outcome = pusher.execute(&job, &AtomicBool::new(false));
        assert_eq!(outcome.units[0].state, PushState::Failed);
        assert!(!outcome.units[0].retryable);
        assert_eq!(outcome.units[1].state, PushState::Acked);
    }

    #[test]
    fn series_commit_uses_newest_point() {
        let remote = Arc::new(MemoryRemote::new());
        let pusher = pusher(remote.clone());
        let owner = EntityRef::new(EntityClass::Measurement, 9, "ZIV1");
        let job = Job::new(
            EntityClass::Measurement,
            vec![PushUnit::Series {
                owner: owner.clone(),
                points: vec![SeriesPoint { id: 1, at: at(1) }, SeriesPoint { id: 2, at: at(2) }],
            }],
        );

        let outcome = pusher.execute(&job, &AtomicBool::new(false));
        let commit = outcome.commits().next().unwrap();
        assert_eq!(commit.marker, Some(Marker::At(at(2))));
        assert_eq!(remote.len(), 1);

        // Redelivery is an identical create.
        pusher.execute(&job, &AtomicBool::new(false));
        assert_eq!(remote.len(), 1);
    }

    #[test]
    fn unknown_class_fails_every_unit() {
        let pusher = pusher(Arc::new(MemoryRemote::new()));
        let job = Job::new(
            EntityClass::Tariff,
            vec![PushUnit::Upsert {
                entity: EntityRef::new(EntityClass::Tariff, 1, "T1"),
                version: None,
            }],
        );
        let outcome = pusher.execute(&job, &AtomicBool::new(false));
        assert_eq!(outcome.count(PushState::Failed), 1);
    }

    /// Remote store that raises a flag once it has served `after` creates.
    struct TrippingRemote {
        inner: Arc<MemoryRemote>,
        stop: Arc<AtomicBool>,
        after: u64,
    }

    impl RemoteStore for TrippingRemote {
        fn get(&self, key: &str) -> RemoteResult<RemoteRecord> {
            self.inner.get(key)
        }

        fn create(&self, key: &str, payload: &Value) -> RemoteResult<Ack> {
            let ack = self.inner.create(key, payload);
            if self.inner.calls().creates >= self.after {
                self.stop.store(true, Ordering::SeqCst);
            }
            ack
        }

        fn update(&self, key: &str, payload: &Value, version: &VersionTag) -> RemoteResult<Ack> {
            let ack = self.inner.update(key, payload, version);
            self.stop.store(true, Ordering::SeqCst);
            ack
        }

        fn list(&self, query: &ListQuery) -> RemoteResult<Vec<RemoteRecord>> {
            self.inner.list(query)
        }
    }

    fn tripping_pusher(remote: Arc<MemoryRemote>, stop: Arc<AtomicBool>) -> Pusher {
        let tripping = Arc::new(TrippingRemote {
            inner: remote,
            stop,
            after: 1,
        });
        let registry =
            Registry::new().with(EntityClass::Contract, tripping as Arc<dyn RemoteStore>);
        Pusher::new(Arc::new(registry), Arc::new(EchoMapper))
    }

    #[test]
    fn stopped_job_issues_no_further_writes() {
        let remote = Arc::new(MemoryRemote::new());
        let stop = Arc::new(AtomicBool::new(false));
        let pusher = tripping_pusher(remote.clone(), stop.clone());
        let job = Job::new(
            EntityClass::Contract,
            (1..=3)
                .map(|id| PushUnit::Upsert {
                    entity: contract(id),
                    version: None,
                })
                .collect(),
        );

        let outcome = pusher.execute(&job, &stop);

        let states: Vec<_> = outcome.units.iter().map(|u| u.state).collect();
        assert_eq!(states, [PushState::Acked, PushState::Pending, PushState::Pending]);
        assert_eq!(remote.len(), 1);
    }

    #[test]
    fn stopped_chain_keeps_acknowledged_steps_only() {
        let remote = Arc::new(MemoryRemote::new());
        let created = remote.create("C1", &json!({"contractId": "C1"})).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let pusher = tripping_pusher(remote.clone(), stop.clone());
        let job = Job::new(
            EntityClass::Contract,
            vec![PushUnit::Chain {
                entity: contract(1),
                version: created.version,
                components: vec![10, 11, 12],
            }],
        );

        let outcome = pusher.execute(&job, &stop);

        assert_eq!(remote.calls().updates, 1);
        assert_eq!(outcome.units[0].state, PushState::Failed);
        assert!(outcome.units[0].retryable);
        let commit = outcome.units[0].commit.as_ref().unwrap();
        assert_eq!(commit.version, Some(remote.record("C1").unwrap().version));
    }

    #[test]
    fn preset_stop_pushes_nothing() {
        let remote = Arc::new(MemoryRemote::new());
        let pusher = pusher(remote.clone());
        let job = Job::new(
            EntityClass::Contract,
            vec![PushUnit::Upsert {
                entity: contract(1),
                version: None,
            }],
        );

        let outcome = pusher.execute(&job, &AtomicBool::new(true));

        assert_eq!(outcome.count(PushState::Pending), 1);
        assert!(remote.is_empty());
    }
}
