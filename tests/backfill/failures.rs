use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use fundfill::adapter::{AdapterError, AdapterErrorKind, AdapterOutcome, SourceAdapter};
use fundfill::backfill::BackfillOrchestrator;
use fundfill::backfill::UniverseSelection;
use fundfill::core::{FillError, RateSpec, Region, SourceId};
use fundfill::governor::RateGovernor;
use fundfill::store::MemStore;

use crate::common::{self, ScriptedAdapter, regulator_record};

fn err(source: SourceId, kind: AdapterErrorKind) -> AdapterError {
    AdapterError {
        source,
        kind,
        message: format!("{kind:?}"),
    }
}

/* ------------- auth poisoning ------------- */

#[tokio::test]
async fn auth_failure_poisons_the_source_for_the_rest_of_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2022, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart, SourceId::Krx];
    config.global_concurrency = 1; // deterministic dispatch order

    let dart = Arc::new(ScriptedAdapter::auth_failed(SourceId::Dart));
    let krx = Arc::new(ScriptedAdapter::regulator_ok(SourceId::Krx));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([
            (SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>),
            (SourceId::Krx, krx.clone() as Arc<dyn SourceAdapter>),
        ]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    // fallback is off: every unit ends skipped, nothing reaches the helper
    assert_eq!(dart.calls(), 1, "only the poisoning call went out");
    assert_eq!(krx.calls(), 0);
    assert_eq!(summary.report.statistics.skipped_units, 3);
    assert_eq!(summary.report.statistics.successful_units, 0);
    assert_eq!(summary.report.statistics.by_source["DART"].auth_failed, 1);
    assert!(store.is_empty().await);
    assert!(!summary.all_sources_auth_failed);
}

#[tokio::test]
async fn poisoned_primary_falls_through_when_fallback_is_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2022, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart, SourceId::Krx];
    config.global_concurrency = 1;
    config.fallback = true;

    let dart = Arc::new(ScriptedAdapter::auth_failed(SourceId::Dart));
    let krx = Arc::new(ScriptedAdapter::regulator_ok(SourceId::Krx));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([
            (SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>),
            (SourceId::Krx, krx.clone() as Arc<dyn SourceAdapter>),
        ]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert_eq!(summary.report.statistics.successful_units, 3);
    assert_eq!(krx.calls(), 3);
    assert_eq!(store.len().await, 3);
}

#[tokio::test]
async fn every_source_poisoned_maps_to_exit_code_4() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2022, 2022);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];

    let dart = Arc::new(ScriptedAdapter::auth_failed(SourceId::Dart));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store,
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert!(summary.all_sources_auth_failed);
    assert_eq!(summary.exit_code(), 4);
}

/* ------------- retry policy ------------- */

#[tokio::test]
async fn transient_failures_retry_and_then_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2024, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];

    // two transient failures, then a record
    let dart = Arc::new(ScriptedAdapter::new(SourceId::Dart, |call, req| {
        if call < 2 {
            Err(err(SourceId::Dart, AdapterErrorKind::Transient))
        } else {
            Ok(AdapterOutcome::Record(Box::new(regulator_record(
                req.ticker,
                req.fiscal_year,
            ))))
        }
    }));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert_eq!(summary.report.statistics.successful_units, 1);
    assert_eq!(dart.calls(), 3);
    let stats = &summary.report.statistics.by_source["DART"];
    assert_eq!(stats.transient, 2);
    assert_eq!(stats.ok, 1);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn exhausted_retries_count_as_failure_but_do_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2023, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];
    config.global_concurrency = 1;

    // 2023 always throttled; 2024 succeeds
    let dart = Arc::new(ScriptedAdapter::new(SourceId::Dart, |_, req| {
        if req.fiscal_year == 2023 {
            Err(err(SourceId::Dart, AdapterErrorKind::Throttled))
        } else {
            Ok(AdapterOutcome::Record(Box::new(regulator_record(
                req.ticker,
                req.fiscal_year,
            ))))
        }
    }));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert_eq!(summary.report.statistics.failed_units, 1);
    assert_eq!(summary.report.statistics.successful_units, 1);
    assert_eq!(summary.exit_code(), 2, "partial run");
    assert_eq!(summary.report.statistics.by_source["DART"].throttled, 3);
    assert_eq!(summary.report.results["005930"][&2023], false);
    assert_eq!(summary.report.results["005930"][&2024], true);
}

#[tokio::test]
async fn malformed_response_is_terminal_for_the_unit() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2024, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];

    let dart = Arc::new(ScriptedAdapter::new(SourceId::Dart, |_, _| {
        Err(err(SourceId::Dart, AdapterErrorKind::MalformedResponse))
    }));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert_eq!(dart.calls(), 1, "no retry on malformed payloads");
    assert_eq!(summary.report.statistics.failed_units, 1);
    assert_eq!(summary.exit_code(), 2);
}

/* ------------- disabled source ------------- */

#[tokio::test]
async fn zero_capacity_source_cannot_be_selected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2024, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];

    let governor = RateGovernor::new([(
        SourceId::Dart,
        RateSpec {
            capacity: 0,
            refill_per_sec: 1.0,
            min_interval: Duration::ZERO,
        },
    )]);
    let dart = Arc::new(ScriptedAdapter::regulator_ok(SourceId::Dart));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(governor),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let result = orch.run(stop_rx).await;

    assert!(matches!(result, Err(FillError::InvalidParams(_))));
    assert_eq!(dart.calls(), 0, "a disabled source never contributes rows");
    assert!(store.is_empty().await);
}
