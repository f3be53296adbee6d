//! Where pulled results come from.

use crate::class::ResultClass;
use crate::error::{CacheError, CacheResult};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use wattsync_engine::RemoteStore;
use wattsync_protocol::{ListQuery, Period};

/// The remote result service, one resource per result class.
pub trait ResultSource: Send + Sync {
    /// Returns the result documents of `contract`, for one period or all.
    fn pull(
        &self,
        class: &ResultClass,
        contract: &str,
        period: Option<Period>,
    ) -> CacheResult<Vec<Value>>;
}

/// Pulls results by listing a [`RemoteStore`] per class.
#[derive(Default)]
pub struct RemoteResultSource {
    remotes: BTreeMap<String, Arc<dyn RemoteStore>>,
}

impl RemoteResultSource {
    /// Creates a source with no resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the resource serving `code`.
    pub fn with(mut self, code: impl Into<String>, remote: Arc<dyn RemoteStore>) -> Self {
        self.remotes.insert(code.into(), remote);
        self
    }
}

impl ResultSource for RemoteResultSource {
    fn pull(
        &self,
        class: &ResultClass,
        contract: &str,
        period: Option<Period>,
    ) -> CacheResult<Vec<Value>> {
        let remote = self
            .remotes
            .get(&class.code)
            .ok_or_else(|| CacheError::UnknownClass(class.code.clone()))?;

        let mut query = ListQuery::new().with_filter("contractId", json!(contract));
        if let Some(period) = period {
            query = query.with_filter(class.period_key.clone(), json!(period.value()));
        }
        let records = remote.list(&query)?;
        debug!(class = %class.code, contract, count = records.len(), "pulled results");
        Ok(records.into_iter().map(|r| r.payload).collect())
    }
}

impl std::fmt::Debug for RemoteResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteResultSource")
            .field("classes", &self.remotes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// An in-memory result service.
#[derive(Debug, Default)]
pub struct MemoryResultSource {
    documents: RwLock<BTreeMap<String, Vec<Value>>>,
}

impl MemoryResultSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a result document for class `code`.
    pub fn publish(&self, code: impl Into<String>, document: Value) {
        self.documents.write().entry(code.into()).or_default().push(document);
    }

    /// Drops every document of class `code`.
    pub fn clear(&self, code: &str) {
        self.documents.write().remove(code);
    }
}

impl ResultSource for MemoryResultSource {
    fn pull(
        &self,
        class: &ResultClass,
        contract: &str,
        period: Option<Period>,
    ) -> CacheResult<Vec<Value>> {
        let documents = self.documents.read();
        Ok(documents
            .get(&class.code)
            .into_iter()
            .flatten()
            .filter(|doc| doc.get("contractId").and_then(Value::as_str) == Some(contract))
            .filter(|doc| {
                period.map_or(true, |p| {
                    doc.get(&class.period_key).and_then(Value::as_u64) == Some(u64::from(p.value()))
                })
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ResultClasses;
    use wattsync_engine::MemoryRemote;

    #[test]
    fn memory_source_filters() {
        let source = MemoryResultSource::new();
        source.publish("ot101", json!({"contractId": "C1", "month": 202301, "consumption": 10}));
        source.publish("ot101", json!({"contractId": "C1", "month": 202302, "consumption": 12}));
        source.publish("ot101", json!({"contractId": "C2", "month": 202301, "consumption": 7}));
        let classes = ResultClasses::builtin();
        let ot101 = classes.get("ot101").unwrap();

        assert_eq!(source.pull(ot101, "C1", None).unwrap().len(), 2);
        assert_eq!(
            source
                .pull(ot101, "C1", Some("202302".parse().unwrap()))
                .unwrap()
                .len(),
            1
        );
        assert!(source.pull(classes.get("ot503").unwrap(), "C1", None).unwrap().is_empty());
    }

    #[test]
    fn remote_source_lists_by_contract() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .create("r1", &json!({"contractId": "C1", "month": 202301, "consumption": 10}))
            .unwrap();
        remote
            .create("r2", &json!({"contractId": "C2", "month": 202301, "consumption": 10}))
            .unwrap();
        let source = RemoteResultSource::new().with("ot101", remote);
        let classes = ResultClasses::builtin();

        let docs = source.pull(classes.get("ot101").unwrap(), "C1", None).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(matches!(
            source.pull(classes.get("ot201").unwrap(), "C1", None),
            Err(CacheError::UnknownClass(_))
        ));
    }
}
