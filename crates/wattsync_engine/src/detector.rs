//! Change detection: which entities need a push.

use crate::cursor::CursorStore;
use crate::error::{SyncError, SyncResult};
use crate::registry::Registry;
use crate::remote::RemoteStore;
use crate::source::{RecordSource, SeriesPoint, SourceEntity, Targets};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wattsync_protocol::{Clock, EntityClass, EntityRef, ListQuery, VersionTag};

/// Options for one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectOptions {
    /// Entities to consider.
    pub targets: Targets,
    /// Push every targeted entity in full, skipping change checks.
    pub force: bool,
    /// Only treat never-pushed entities created after the newest remote
    /// update as new.
    pub since_latest_remote: bool,
}

impl DetectOptions {
    /// Considers every eligible entity.
    pub fn all() -> Self {
        Self::default()
    }

    /// Considers only the given natural keys.
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: Targets::keys(keys),
            ..Self::default()
        }
    }

    /// Enables forced pushes.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Enables new-entity narrowing by the newest remote update.
    pub fn since_latest_remote(mut self) -> Self {
        self.since_latest_remote = true;
        self
    }
}

/// A unit the dispatcher should push.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// Never pushed, or deleted remotely: create the full document.
    New {
        /// Entity to create.
        entity: EntityRef,
        /// True if the remote store lost a record we had pushed.
        recreate: bool,
    },
    /// Full write requested by the operator.
    Forced {
        /// Entity to write.
        entity: EntityRef,
        /// Stored version tag; `None` means create.
        version: Option<VersionTag>,
    },
    /// Previously pushed and changed since the remote's last update.
    Changed {
        /// Entity to update.
        entity: EntityRef,
        /// Version tag the remote store reported when probed.
        version: VersionTag,
        /// Components to push, in chronological order. Empty means the
        /// whole document.
        components: Vec<u64>,
    },
    /// Series points after the cursor, oldest first.
    Series {
        /// Owner of the points.
        owner: EntityRef,
        /// Points to push.
        points: Vec<SeriesPoint>,
    },
}

impl Candidate {
    /// The entity whose cursor this candidate moves.
    pub fn entity(&self) -> &EntityRef {
        match self {
            Candidate::New { entity, .. }
            | Candidate::Forced { entity, .. }
            | Candidate::Changed { entity, .. } => entity,
            Candidate::Series { owner, .. } => owner,
        }
    }
}

/// An entity that could not be examined.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFailure {
    /// The entity.
    pub entity: EntityRef,
    /// What went wrong.
    pub error: SyncError,
}

/// Output of one detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
    /// Entity class examined.
    pub class: EntityClass,
    /// Number of entities examined.
    pub examined: usize,
    /// Units to push.
    pub candidates: Vec<Candidate>,
    /// Per-entity failures; they never abort the pass.
    pub failures: Vec<DetectionFailure>,
}

impl DetectionReport {
    fn new(class: EntityClass) -> Self {
        Self {
            class,
            examined: 0,
            candidates: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, entity: EntityRef, error: SyncError) {
        warn!(entity = %entity, error = %error, "detection failed for entity");
        self.failures.push(DetectionFailure { entity, error });
    }
}

/// Computes candidate sets per entity class.
#[derive(Clone)]
pub struct ChangeDetector {
    source: Arc<dyn RecordSource>,
    cursors: Arc<CursorStore>,
    remotes: Arc<Registry<Arc<dyn RemoteStore>>>,
    clock: Arc<dyn Clock>,
    history: chrono::Duration,
}

impl ChangeDetector {
    /// Creates a detector.
    pub fn new(
        source: Arc<dyn RecordSource>,
        cursors: Arc<CursorStore>,
        remotes: Arc<Registry<Arc<dyn RemoteStore>>>,
        clock: Arc<dyn Clock>,
        history: chrono::Duration,
    ) -> Self {
        Self {
            source,
            cursors,
            remotes,
            clock,
            history,
        }
    }

    /// Runs one detection pass for `class`.
    ///
    /// # Errors
    ///
    /// Fails only when the pass as a whole cannot run (listing the
    /// system of record, or the remote listing used by
    /// `since_latest_remote`). Per-entity problems land in
    /// [`DetectionReport::failures`].
    pub fn detect(
        &self,
        class: EntityClass,
        options: &DetectOptions,
    ) -> SyncResult<DetectionReport> {
        let report = if class.is_series() {
            self.detect_series(class, options)?
        } else {
            self.detect_versioned(class, options)?
        };
        info!(
            class = %class,
            examined = report.examined,
            candidates = report.candidates.len(),
            failures = report.failures.len(),
            "detection finished"
        );
        Ok(report)
    }

    fn detect_versioned(
        &self,
        class: EntityClass,
        options: &DetectOptions,
    ) -> SyncResult<DetectionReport> {
        let remote = self.remotes.get(class)?;
        let entities = self.source.entities(class, &options.targets)?;
        let mut report = DetectionReport::new(class);
        let mut newest_remote: Option<Option<DateTime<Utc>>> = None;

        for item in entities {
            report.examined += 1;
            let cursor = match self.cursors.get(&item.entity) {
                Ok(cursor) => cursor,
                Err(e) => {
                    report.fail(item.entity, e);
                    continue;
                }
            };

            if options.force {
                info!(entity = %item.entity, "forcing push");
                report.candidates.push(Candidate::Forced {
                    entity: item.entity,
                    version: cursor.version,
                });
                continue;
            }

            if cursor.version.is_none() {
                if options.since_latest_remote {
                    let newest = match newest_remote {
                        Some(newest) => newest,
                        None => {
                            let newest = newest_update(remote.as_ref())?;
                            newest_remote = Some(newest);
                            newest
                        }
                    };
                    if newest.is_some_and(|newest| item.created_at <= newest) {
                        debug!(
                            entity = %item.entity,
                            "created before newest remote update, skipping"
                        );
                        continue;
                    }
                }
                info!(entity = %item.entity, "never pushed, enqueuing as new");
                report.candidates.push(Candidate::New {
                    entity: item.entity,
                    recreate: false,
                });
                continue;
            }

            match self.probe(remote.as_ref(), &item) {
                Ok(Some(candidate)) => report.candidates.push(candidate),
                Ok(None) => debug!(entity = %item.entity, "up to date"),
                Err(e) => report.fail(item.entity, e),
            }
        }

        Ok(report)
    }

    /// Compares local write stamps against the remote's last update.
    fn probe(
        &self,
        remote: &dyn RemoteStore,
        item: &SourceEntity,
    ) -> SyncResult<Option<Candidate>> {
        let entity = &item.entity;
        let record = match remote.get(&entity.key) {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                info!(entity = %entity, "pushed before but missing remotely, re-creating");
                return Ok(Some(Candidate::New {
                    entity: entity.clone(),
                    recreate: true,
                }));
            }
            Err(e) => return Err(e.into()),
        };
        let last_updated = record.updated_at;

        if entity.class != EntityClass::Contract {
            return Ok((item.written_at > last_updated).then(|| Candidate::Changed {
                entity: entity.clone(),
                version: record.version,
                components: Vec::new(),
            }));
        }

        let mut modifications: Vec<_> = self
            .source
            .modifications(entity)?
            .into_iter()
            .filter(|m| m.written_at > last_updated)
            .collect();
        if !modifications.is_empty() {
            modifications.sort_by_key(|m| (m.starts_on, m.id));
            for m in &modifications {
                info!(
                    entity = %entity,
                    modification = m.id,
                    written_at = %m.written_at,
                    last_updated = %last_updated,
                    "modification to update"
                );
            }
            return Ok(Some(Candidate::Changed {
                entity: entity.clone(),
                version: record.version,
                components: modifications.into_iter().map(|m| m.id).collect(),
            }));
        }

        let devices_written = self
            .source
            .devices(entity)?
            .into_iter()
            .map(|d| d.written_at)
            .max();
        let newest = devices_written.map_or(item.written_at, |d| d.max(item.written_at));
        if newest <= last_updated {
            return Ok(None);
        }

        let active = item.active_component.ok_or_else(|| {
            SyncError::source(format!("{entity} changed but has no active modification"))
        })?;
        info!(
            entity = %entity,
            modification = active,
            "only devices changed, pushing active modification"
        );
        Ok(Some(Candidate::Changed {
            entity: entity.clone(),
            version: record.version,
            components: vec![active],
        }))
    }

    fn detect_series(
        &self,
        class: EntityClass,
        options: &DetectOptions,
    ) -> SyncResult<DetectionReport> {
        let owners = self.source.series_owners(class, &options.targets)?;
        let window_start = self.clock.now() - self.history;
        let mut report = DetectionReport::new(class);

        for owner in owners {
            report.examined += 1;
            let cursor = match self.cursors.get(&owner) {
                Ok(cursor) => cursor,
                Err(e) => {
                    report.fail(owner, e);
                    continue;
                }
            };

            let since = match cursor.marker.and_then(|m| m.as_time()) {
                Some(last) if !options.force => {
                    debug!(owner = %owner, last = %last, "last confirmed point");
                    last
                }
                _ => {
                    debug!(
                        owner = %owner,
                        since = %window_start,
                        "no cursor, pushing the history window"
                    );
                    window_start
                }
            };

            match self.source.series_since(class, &owner, since) {
                Ok(mut points) => {
                    points.retain(|p| p.at > since);
                    points.sort_by_key(|p| (p.at, p.id));
                    if points.is_empty() {
                        continue;
                    }
                    info!(owner = %owner, count = points.len(), "series points to push");
                    report.candidates.push(Candidate::Series { owner, points });
                }
                Err(e) => report.fail(owner, e),
            }
        }

        Ok(report)
    }
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

fn newest_update(remote: &dyn RemoteStore) -> SyncResult<Option<DateTime<Utc>>> {
    let latest = remote.list(&ListQuery::latest())?;
    Ok(latest.first().map(|r| r.updated_at))
}
