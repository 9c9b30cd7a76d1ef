use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use fundfill::adapter::SourceAdapter;
use fundfill::backfill::{BackfillOrchestrator, UniverseSelection};
use fundfill::core::{RateSpec, Region, SourceId};
use fundfill::governor::RateGovernor;
use fundfill::store::MemStore;

use crate::common::{self, ScriptedAdapter};

/* ------------- rate compliance across a whole run ------------- */

#[tokio::test(start_paused = true)]
async fn ten_units_through_a_two_second_lane_take_eighteen_seconds() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2015, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];
    config.global_concurrency = 4; // concurrency does not beat the governor

    let governor = RateGovernor::new([(
        SourceId::Dart,
        RateSpec {
            capacity: 1,
            refill_per_sec: 0.5,
            min_interval: Duration::from_secs(2),
        },
    )]);

    let dart = Arc::new(ScriptedAdapter::regulator_ok(SourceId::Dart));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(governor),
        store.clone(),
    );

    let t0 = Instant::now();
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert_eq!(summary.report.statistics.successful_units, 10);
    assert_eq!(store.len().await, 10);

    let times = dart.call_times();
    assert_eq!(times.len(), 10);
    // the 10th outbound call begins no earlier than t0 + 9 * min_interval
    assert!(
        times[9].duration_since(t0) >= Duration::from_millis(17_990),
        "10th call at {:?}",
        times[9].duration_since(t0)
    );
    // no sliding 2s window ever sees more than one call
    for pair in times.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(1_990));
    }
}
