//! Test fixtures wiring engines, caches and stores.

use crate::system::FakeSystem;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use wattsync_cache::{ErrorReporter, Reconciler, ResultCache, ResultClasses};
use wattsync_engine::{Collaborators, Registry, RemoteStore, SyncConfig, SyncEngine};
use wattsync_protocol::{EntityClass, FixedClock};
use wattsync_storage::FileStore;

/// Instant every fixture clock starts at.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 15, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A sync engine over a fake system of record and in-memory remote stores.
pub struct SyncBench {
    /// Shared clock.
    pub clock: Arc<FixedClock>,
    /// System of record.
    pub system: Arc<FakeSystem>,
    /// Remote store per entity class.
    pub remotes: BTreeMap<EntityClass, Arc<wattsync_engine::MemoryRemote>>,
    /// The engine.
    pub engine: SyncEngine,
}

impl SyncBench {
    /// Creates a bench with `config`.
    pub fn new(config: SyncConfig) -> Self {
        let clock = Arc::new(FixedClock::new(start_time()));
        let system = Arc::new(FakeSystem::new(clock.clone()));

        let mut remotes = BTreeMap::new();
        let mut registry: Registry<Arc<dyn RemoteStore>> = Registry::new();
        for class in EntityClass::ALL {
            let remote = Arc::new(wattsync_engine::MemoryRemote::with_clock(clock.clone()));
            registry.insert(class, remote.clone());
            remotes.insert(class, remote);
        }

        let parts = Collaborators::new(system.clone(), system.clone(), system.clone(), registry)
            .with_clock(clock.clone());
        let engine = SyncEngine::new(config, parts).expect("valid bench config");

        Self {
            clock,
            system,
            remotes,
            engine,
        }
    }

    /// Returns the remote store of `class`.
    pub fn remote(&self, class: EntityClass) -> &wattsync_engine::MemoryRemote {
        self.remotes
            .get(&class)
            .map(Arc::as_ref)
            .expect("every class has a remote")
    }
}

impl Default for SyncBench {
    fn default() -> Self {
        Self::new(SyncConfig::new())
    }
}

/// A file-backed cache in a temporary directory.
pub struct TempCache {
    /// The store.
    pub store: Arc<FileStore>,
    /// Shared clock for validation dates.
    pub clock: Arc<FixedClock>,
    dir: TempDir,
}

impl TempCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(
            FileStore::open(&dir.path().join("cache.json")).expect("Failed to open store"),
        );
        Self {
            store,
            clock: Arc::new(FixedClock::new(start_time())),
            dir,
        }
    }

    /// Returns the snapshot path.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("cache.json")
    }

    /// A result cache over the store.
    pub fn cache(&self) -> ResultCache {
        ResultCache::new(self.store.clone(), ResultClasses::builtin())
    }

    /// A reconciler over the store.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.store.clone(), self.store.clone(), ResultClasses::builtin())
            .with_clock(self.clock.clone())
    }

    /// A reporter over the store.
    pub fn reporter(&self) -> ErrorReporter {
        ErrorReporter::new(self.store.clone()).with_clock(self.clock.clone())
    }
}

impl Default for TempCache {
    fn default() -> Self {
        Self::new()
    }
}
