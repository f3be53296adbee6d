//! Result cache: pull, replace and read back cached remote results.

use crate::class::ResultClasses;
use crate::error::CacheResult;
use crate::source::ResultSource;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use wattsync_protocol::{CachedResult, Period, PeriodRange};
use wattsync_storage::ResultStore;

/// Cached copies of remote results, one collection per result class.
///
/// Rows are only ever replaced wholesale: a pull deletes the cached row of
/// each pulled period before inserting the fresh one.
pub struct ResultCache {
    store: Arc<dyn ResultStore>,
    classes: ResultClasses,
}

impl ResultCache {
    /// Creates a cache over `store`.
    pub fn new(store: Arc<dyn ResultStore>, classes: ResultClasses) -> Self {
        Self { store, classes }
    }

    /// Returns the result classes.
    pub fn classes(&self) -> &ResultClasses {
        &self.classes
    }

    /// Pulls results of `contract` (one period or all) and caches them.
    ///
    /// Returns the number of rows written.
    pub fn pull(
        &self,
        source: &dyn ResultSource,
        code: &str,
        contract: &str,
        period: Option<Period>,
    ) -> CacheResult<usize> {
        let class = self.classes.get(code)?;
        let documents = source.pull(class, contract, period)?;

        let mut written = 0;
        for document in &documents {
            let result =
                CachedResult::from_document(document, &class.period_key, &class.value_key)?;
            debug!(class = code, contract, period = %result.period, "replacing cached result");
            self.store.replace(code, result)?;
            written += 1;
        }
        info!(class = code, contract, written, "pulled results");
        Ok(written)
    }

    /// Returns the public documents the class view selects for `period`.
    pub fn cached(&self, code: &str, contract: &str, period: Period) -> CacheResult<Vec<Value>> {
        let class = self.classes.get(code)?;
        let range = class.view_range(period)?;
        Ok(self
            .store
            .find(code, contract, range)?
            .iter()
            .map(|r| r.public_document(&class.period_key, &class.value_key))
            .collect())
    }

    /// Returns raw cached rows.
    pub fn rows(
        &self,
        code: &str,
        contract: &str,
        range: PeriodRange,
    ) -> CacheResult<Vec<CachedResult>> {
        self.classes.get(code)?;
        Ok(self.store.find(code, contract, range)?)
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryResultSource;
    use serde_json::json;
    use wattsync_storage::MemoryStore;

    fn p(raw: &str) -> Period {
        raw.parse().unwrap()
    }

    fn cache() -> (Arc<MemoryStore>, ResultCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = ResultCache::new(store.clone(), ResultClasses::builtin());
        (store, cache)
    }

    #[test]
    fn pull_replaces_rows() {
        let (store, cache) = cache();
        let source = MemoryResultSource::new();
        source.publish("ot101", json!({"contractId": "C1", "month": 202301, "consumption": 10.0}));

        assert_eq!(cache.pull(&source, "ot101", "C1", None).unwrap(), 1);
        source.clear("ot101");
        source.publish("ot101", json!({"contractId": "C1", "month": 202301, "consumption": 12.0}));
        cache.pull(&source, "ot101", "C1", None).unwrap();

        let rows = store.find("ot101", "C1", PeriodRange::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 12.0);
    }

    #[test]
    fn pull_rejects_malformed_documents() {
        let (_, cache) = cache();
        let source = MemoryResultSource::new();
        source.publish("ot101", json!({"contractId": "C1", "month": 202301}));

        assert!(cache.pull(&source, "ot101", "C1", None).is_err());
    }

    #[test]
    fn cached_strips_hidden_keys() {
        let (store, cache) = cache();
        store
            .insert(
                "ot101",
                CachedResult::new("C1", p("202301"), 10.0)
                    .with_metadata("_etag", json!("e1"))
                    .with_metadata("companyId", json!(8))
                    .with_metadata("ranking", json!(3)),
            )
            .unwrap();

        let docs = cache.cached("ot101", "C1", p("202301")).unwrap();
        assert_eq!(
            docs,
            vec![json!({"contractId": "C1", "month": 202301, "consumption": 10.0, "ranking": 3})]
        );
    }

    #[test]
    fn windowed_and_daily_views() {
        let (store, cache) = cache();
        for month in ["202112", "202201", "202301"] {
            store.insert("ot103", CachedResult::new("C1", p(month), 1.0)).unwrap();
        }
        for day in ["20230131", "20230201", "20230228"] {
            store.insert("ot503", CachedResult::new("C1", p(day), 1.0)).unwrap();
        }

        assert_eq!(cache.cached("ot103", "C1", p("202301")).unwrap().len(), 2);
        assert_eq!(cache.cached("ot503", "C1", p("202302")).unwrap().len(), 2);
    }
}
