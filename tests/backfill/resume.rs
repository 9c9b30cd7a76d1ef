use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use fundfill::adapter::SourceAdapter;
use fundfill::backfill::{
    BackfillOrchestrator, Checkpoint, UniverseSelection, UnitState, UnitStatus,
};
use fundfill::core::{Region, SourceId};
use fundfill::store::MemStore;

use crate::common::{self, ScriptedAdapter};

/* ------------- resume from a prior checkpoint ------------- */

#[tokio::test]
async fn terminal_units_in_the_checkpoint_are_not_refetched() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2020, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];

    // as if a previous run finished 2020 and 2021 before dying
    let mut cp = Checkpoint::default();
    cp.seq = 3;
    for year in [2020, 2021] {
        cp.units.insert(
            format!("005930|KR|{year}|ANNUAL"),
            UnitState {
                status: UnitStatus::Ok,
                attempts: 1,
                ..UnitState::default()
            },
        );
    }
    cp.save(&config.checkpoint_path).await.unwrap();

    let dart = Arc::new(ScriptedAdapter::regulator_ok(SourceId::Dart));
    let orch = BackfillOrchestrator::new(
        config.clone(),
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert_eq!(dart.calls(), 3, "only 2022..2024 hit the provider");
    assert_eq!(summary.report.statistics.total_units, 3);
    assert_eq!(summary.report.statistics.successful_units, 3);

    // every unit is terminal, so the completed run retires its checkpoint
    assert!(
        Checkpoint::load(&config.checkpoint_path)
            .await
            .unwrap()
            .is_none()
    );
}

/* ------------- interrupt, then resume to the same end state ------------- */

#[tokio::test]
async fn interrupted_run_resumes_to_the_uninterrupted_end_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2015, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];
    config.global_concurrency = 1;
    config.shutdown_grace = Duration::from_secs(5);

    let dart = Arc::new(
        ScriptedAdapter::regulator_ok(SourceId::Dart).with_latency(Duration::from_millis(100)),
    );
    let orch = BackfillOrchestrator::new(
        config.clone(),
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let run = tokio::spawn(async move { orch.run(stop_rx).await });
    tokio::time::sleep(Duration::from_millis(320)).await;
    stop_tx.send(true).unwrap();
    let summary = run.await.unwrap().unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.exit_code(), 130);
    let completed_first = summary.report.statistics.successful_units;
    assert!(completed_first < 10, "interrupt landed mid-run");
    assert_eq!(store.len().await, completed_first as usize);
    // an interrupted run keeps its checkpoint for the resume
    let kept = Checkpoint::load(&config.checkpoint_path)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        kept.units
            .values()
            .filter(|u| u.status == UnitStatus::Ok)
            .count() as u64,
        completed_first
    );

    // same parameters, same checkpoint: the rest completes exactly once
    let orch2 = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop2, stop_rx2) = watch::channel(false);
    let summary2 = orch2.run(stop_rx2).await.unwrap();

    assert_eq!(summary2.exit_code(), 0);
    assert_eq!(
        completed_first + summary2.report.statistics.successful_units,
        10
    );
    assert_eq!(store.len().await, 10, "final state matches an uninterrupted run");
    // at most the one fetch cancelled mid-flight is repeated
    assert!((10..=11).contains(&(dart.calls() as u64)));
}
