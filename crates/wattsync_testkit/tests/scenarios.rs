//! Sync and validation scenarios over the fake system of record.

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use wattsync_engine::{
    plan_jobs, Candidate, DetectOptions, DetectionReport, PushUnit, RemoteStore, SyncConfig,
};
use wattsync_protocol::{
    CachedResult, Clock, EntityClass, EntityRef, ErrorKind, Marker, PeriodRange,
};
use wattsync_storage::ResultStore;
use wattsync_testkit::prelude::*;

fn day(month: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, month, d).unwrap()
}

#[tokio::test]
async fn modifications_are_pushed_in_chronological_order() {
    let bench = SyncBench::default();
    let c1 = bench
        .system
        .add_contract("C1", json!({"power": 3.3, "tariff": {"code": "2.0A"}}));
    bench
        .engine
        .sync_class(EntityClass::Contract, &DetectOptions::all())
        .await
        .unwrap();
    let created = bench.remote(EntityClass::Contract).record("C1").unwrap();

    bench.clock.advance(Duration::days(1));
    let later = bench
        .system
        .modify_contract(&c1, day(3, 1), json!({"power": 5.5}));
    bench
        .system
        .modify_contract(&c1, day(2, 1), json!({"tariff": {"code": "2.0DHA"}}));

    bench.clock.advance(Duration::hours(1));
    let result = bench
        .engine
        .sync_class(EntityClass::Contract, &DetectOptions::all())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.acked, 1);
    let remote = bench.remote(EntityClass::Contract);
    assert_eq!(remote.calls().updates, 2);
    let record = remote.record("C1").unwrap();
    assert_ne!(record.version, created.version);
    assert_eq!(record.payload["modification"], json!(later));
    assert_eq!(record.payload["power"], json!(5.5));
    assert_eq!(record.payload["tariff"]["code"], json!("2.0DHA"));
    assert_eq!(bench.system.cursor(&c1).version, Some(record.version));
}

#[tokio::test]
async fn device_only_change_pushes_active_modification() {
    let bench = SyncBench::default();
    let c1 = bench.system.add_contract("C1", json!({"power": 3.3}));
    bench
        .engine
        .sync_class(EntityClass::Contract, &DetectOptions::all())
        .await
        .unwrap();

    bench.clock.advance(Duration::days(2));
    bench.system.write_device(&c1, None);
    bench.clock.advance(Duration::hours(1));
    let result = bench
        .engine
        .sync_class(EntityClass::Contract, &DetectOptions::all())
        .await
        .unwrap();

    assert_eq!(result.detected, 1);
    let record = bench.remote(EntityClass::Contract).record("C1").unwrap();
    assert_eq!(
        record.payload["modification"],
        json!(bench.system.active_modification(&c1))
    );
}

#[tokio::test]
async fn cancelled_contracts_are_never_selected() {
    let bench = SyncBench::default();
    let c1 = bench.system.add_contract("C1", json!({}));
    bench.system.add_contract("C2", json!({}));
    bench.system.cancel(&c1);

    let result = bench
        .engine
        .sync_class(EntityClass::Contract, &DetectOptions::all())
        .await
        .unwrap();

    assert_eq!(result.examined, 1);
    assert!(bench.remote(EntityClass::Contract).record("C1").is_none());
}

#[tokio::test]
async fn new_contracts_can_be_narrowed_to_after_latest_remote() {
    let bench = SyncBench::default();
    bench.system.add_contract("OLD", json!({}));
    bench
        .remote(EntityClass::Contract)
        .create("ELSEWHERE", &json!({"contractId": "ELSEWHERE"}))
        .unwrap();
    bench.clock.advance(Duration::hours(1));
    bench.system.add_contract("NEW", json!({}));

    let result = bench
        .engine
        .sync_class(
            EntityClass::Contract,
            &DetectOptions::all().since_latest_remote(),
        )
        .await
        .unwrap();

    assert_eq!(result.detected, 1);
    let remote = bench.remote(EntityClass::Contract);
    assert!(remote.record("NEW").is_some());
    assert!(remote.record("OLD").is_none());
}

#[tokio::test]
async fn profiles_and_tariffs_sync_independently() {
    let bench = SyncBench::default();
    let profile = bench.system.add_series_owner(EntityClass::Profile, "C1");
    let start = bench.clock.now();
    bench
        .system
        .record_points(&profile, &[start - Duration::hours(2), start - Duration::hours(1)]);
    bench.system.add_tariff("2.0TD-2023", json!({"prices": [0.12, 0.09]}));

    let results = bench.engine.sync_all(&DetectOptions::all()).await;

    for (class, result) in &results {
        let result = result.as_ref().unwrap();
        assert!(result.success, "{class} failed");
    }
    assert_eq!(
        bench.system.cursor(&profile).marker,
        Some(Marker::At(start - Duration::hours(1)))
    );
    assert_eq!(bench.remote(EntityClass::Tariff).len(), 1);
    assert_eq!(bench.remote(EntityClass::Profile).len(), 1);
}

#[test]
fn validation_scenario_on_file_cache() {
    let cache = TempCache::new();
    for (month, value) in [("202301", 100.0), ("202303", 90.0)] {
        cache
            .store
            .insert(
                "ot101",
                CachedResult::new("C1", month.parse().unwrap(), value),
            )
            .unwrap();
    }
    let values: BTreeMap<_, _> = [
        ("202301".parse().unwrap(), 100.0),
        ("202302".parse().unwrap(), 150.0),
    ]
    .into();

    let report = cache
        .reconciler()
        .validate("ot101", "C1", &values, None)
        .unwrap();

    assert_eq!(report.count(ErrorKind::NoResult), 1);
    assert_eq!(report.count(ErrorKind::NoStored), 1);
    let rows = cache.store.find("ot101", "C1", PeriodRange::all()).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(cache.path().exists());
}

proptest! {
    #[test]
    fn planned_jobs_cover_every_candidate_once(
        entities in 0usize..60,
        bucket in 1usize..8,
    ) {
        let candidates: Vec<Candidate> = (0..entities)
            .map(|i| Candidate::New {
                entity: EntityRef::contract(i as u64, format!("C{i}")),
                recreate: false,
            })
            .collect();
        let report = DetectionReport {
            class: EntityClass::Contract,
            examined: entities,
            candidates,
            failures: Vec::new(),
        };

        let jobs = plan_jobs(report, bucket);
        let keys: Vec<String> = jobs
            .iter()
            .flat_map(|j| j.units.iter())
            .map(|u| match u {
                PushUnit::Upsert { entity, .. } => entity.key.clone(),
                other => panic!("unexpected unit {other:?}"),
            })
            .collect();
        let unique: std::collections::BTreeSet<_> = keys.iter().collect();

        prop_assert_eq!(keys.len(), entities);
        prop_assert_eq!(unique.len(), entities);
        prop_assert!(jobs.iter().all(|j| j.units.len() <= bucket));
    }

    #[test]
    fn series_cursor_ends_at_newest_confirmed_point(instants in instants_strategy(30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let bench = SyncBench::new(SyncConfig::new().with_bucket_size(4));
        let meter = bench.system.add_series_owner(EntityClass::Measurement, "M1");
        bench.clock.advance(Duration::days(30));

        let mut last = None;
        for chunk in instants.chunks(7) {
            bench.system.record_points(&meter, chunk);
            runtime
                .block_on(bench.engine.sync_class(EntityClass::Measurement, &DetectOptions::all()))
                .unwrap();
            let marker = bench.system.cursor(&meter).marker;
            prop_assert!(marker >= last);
            last = marker;
        }

        let newest = instants.iter().max().copied().map(Marker::At);
        prop_assert_eq!(bench.system.cursor(&meter).marker, newest);
    }
}
