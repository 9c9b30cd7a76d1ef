use std::sync::Arc;

use tokio::sync::watch;

use fundfill::adapter::{AdapterOutcome, SourceAdapter};
use fundfill::backfill::{BackfillOrchestrator, Mode, UniverseSelection};
use fundfill::core::{FundamentalRecord, PeriodType, Region, SourceId};
use fundfill::store::{FundamentalsStore, MemStore, UpsertEngine};

use crate::common::{self, ScriptedAdapter};

fn krx_snapshot(ticker: &str, year: i32) -> FundamentalRecord {
    let mut rec =
        FundamentalRecord::bare(ticker, Region::Kr, Some(year), PeriodType::Annual, "KRX");
    rec.per = Some(12.5);
    rec.close_price = Some(71_000.0);
    rec
}

/* ------------- one ticker, three years, regulator only ------------- */

#[tokio::test]
async fn happy_path_one_ticker_three_years() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2022, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];

    let dart = Arc::new(ScriptedAdapter::regulator_ok(SourceId::Dart));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );

    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.report.statistics.total_units, 3);
    assert_eq!(summary.report.statistics.successful_units, 3);
    assert_eq!(summary.report.statistics.failed_units, 0);

    let rows = store.dump().await;
    assert_eq!(rows.len(), 3, "one row per fiscal year");
    for (row, year) in rows.iter().zip([2022, 2023, 2024]) {
        assert_eq!(row.record.ticker, "005930");
        assert_eq!(row.record.fiscal_year, Some(year));
        assert_eq!(row.record.period_type, Some(PeriodType::Annual));
        assert_eq!(row.record.data_source, format!("DART-{year}-11011"));
        // gross profit derived from revenue - cogs at write time
        assert_eq!(row.record.gross_profit, Some(400));
    }
    // range endpoints both produced rows
    assert!(summary.report.results["005930"][&2022]);
    assert!(summary.report.results["005930"][&2024]);
}

/* ------------- incremental re-run is a no-op ------------- */

#[tokio::test]
async fn incremental_rerun_skips_everything_and_leaves_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2022, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];

    let dart = Arc::new(ScriptedAdapter::regulator_ok(SourceId::Dart));
    let orch = BackfillOrchestrator::new(
        config.clone(),
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    orch.run(stop_rx).await.unwrap();
    let first_dump = store.dump().await;
    assert_eq!(dart.calls(), 3);

    // second run: incremental; the first run retired its checkpoint, so
    // only the store-state filter decides what to skip
    let mut config2 = config;
    config2.mode = Mode::Incremental;
    let orch2 = BackfillOrchestrator::new(
        config2,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop2, stop_rx2) = watch::channel(false);
    let summary = orch2.run(stop_rx2).await.unwrap();

    assert_eq!(summary.report.statistics.successful_units, 0);
    assert_eq!(summary.report.statistics.skipped_units, 3);
    assert_eq!(dart.calls(), 3, "no further provider traffic");
    // identical store state, updated_at included
    assert_eq!(store.dump().await, first_dump);
}

/* ------------- provenance upgrade ------------- */

#[tokio::test]
async fn regulator_row_replaces_fallback_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    // store starts with a fallback-grade row
    let engine = UpsertEngine::new(store.clone() as Arc<dyn FundamentalsStore>);
    let mut seeded = FundamentalRecord::bare(
        "AAPL",
        Region::Us,
        Some(2023),
        PeriodType::Annual,
        "YFINANCE",
    );
    seeded.revenue = Some(100);
    engine.upsert(seeded).await.unwrap();
    let before = store.dump().await.remove(0);

    let mut config = common::test_config(&dir, Region::Us, 2023, 2023);
    config.universe = UniverseSelection::Explicit(vec!["AAPL".into()]);
    config.sources = vec![SourceId::Dart];

    let dart = Arc::new(ScriptedAdapter::new(SourceId::Dart, |_, req| {
        let mut rec = FundamentalRecord::bare(
            req.ticker,
            req.region,
            Some(req.fiscal_year),
            req.period_type,
            format!("DART-{}-11011", req.fiscal_year),
        );
        rec.revenue = Some(100);
        rec.net_income = Some(20);
        rec.total_equity = Some(50);
        Ok(AdapterOutcome::Record(Box::new(rec)))
    }));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();
    assert_eq!(summary.report.statistics.successful_units, 1);

    let rows = store.dump().await;
    assert_eq!(rows.len(), 1, "same identity, still one row");
    let row = &rows[0];
    assert_eq!(row.record.data_source, "DART-2023-11011");
    assert_eq!(row.record.net_income, Some(20));
    assert_eq!(row.record.total_equity, Some(50));
    assert!(row.updated_at > before.updated_at, "updated_at refreshed");
    assert_eq!(row.created_at, before.created_at);
}

/* ------------- fallback chain ------------- */

#[tokio::test]
async fn not_found_falls_through_to_next_source_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2022, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart, SourceId::Krx];
    config.fallback = true;

    let dart = Arc::new(ScriptedAdapter::new(SourceId::Dart, |_, _| {
        Ok(AdapterOutcome::Empty)
    }));
    let krx = Arc::new(ScriptedAdapter::new(SourceId::Krx, |_, req| {
        Ok(AdapterOutcome::Record(Box::new(krx_snapshot(
            req.ticker,
            req.fiscal_year,
        ))))
    }));
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
    assert_eq!(dart.calls(), 3);
    assert_eq!(krx.calls(), 3);
    for row in store.dump().await {
        assert_eq!(row.record.data_source, "KRX");
    }
}

/* ------------- empty universe ------------- */

#[tokio::test]
async fn empty_universe_is_a_clean_zero_unit_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new()); // registry never seeded

    let mut config = common::test_config(&dir, Region::Kr, 2022, 2024);
    config.universe = UniverseSelection::All;
    config.sources = vec![SourceId::Dart];

    let dart = Arc::new(ScriptedAdapter::regulator_ok(SourceId::Dart));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.report.statistics.total_units, 0);
    assert_eq!(dart.calls(), 0);
    assert!(store.is_empty().await);
}

/* ------------- dry run ------------- */

#[tokio::test]
async fn dry_run_plans_without_fetching_or_writing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    let mut config = common::test_config(&dir, Region::Kr, 2022, 2024);
    config.universe = UniverseSelection::Explicit(vec!["005930".into()]);
    config.sources = vec![SourceId::Dart];
    config.dry_run = true;

    let dart = Arc::new(ScriptedAdapter::regulator_ok(SourceId::Dart));
    let orch = BackfillOrchestrator::new(
        config,
        common::adapters_of([(SourceId::Dart, dart.clone() as Arc<dyn SourceAdapter>)]),
        Arc::new(common::open_governor()),
        store.clone(),
    );
    let (_stop, stop_rx) = watch::channel(false);
    let summary = orch.run(stop_rx).await.unwrap();

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.report.statistics.total_units, 3);
    assert_eq!(dart.calls(), 0, "no network calls in a dry run");
    assert!(store.is_empty().await);
    assert!(summary.report_path.unwrap().exists());
}
