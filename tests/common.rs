#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use fundfill::adapter::{
    AdapterError, AdapterErrorKind, AdapterOutcome, FetchRequest, SourceAdapter,
};
use fundfill::backfill::{BackfillConfig, Mode, UniverseSelection};
use fundfill::core::{FundamentalRecord, PeriodType, RateSpec, Region, SourceId, Ticker};
use fundfill::governor::RateGovernor;

pub fn kr_ticker(symbol: &str) -> Ticker {
    Ticker {
        symbol: symbol.to_string(),
        region: Region::Kr,
        name: None,
        sector_code: None,
        active: true,
        listed_on: None,
        delisted_on: None,
        market_cap: None,
    }
}

pub fn regulator_record(ticker: &str, year: i32) -> FundamentalRecord {
    let mut rec = FundamentalRecord::bare(
        ticker,
        Region::Kr,
        Some(year),
        PeriodType::Annual,
        format!("DART-{year}-11011"),
    );
    rec.revenue = Some(1_000);
    rec.cogs = Some(600);
    rec.net_income = Some(120);
    rec
}

/// An in-process adapter whose behavior is decided per call by a script
/// closure; records call counts and grant times for rate assertions.
pub struct ScriptedAdapter {
    id: SourceId,
    calls: AtomicU32,
    call_times: std::sync::Mutex<Vec<Instant>>,
    script: Box<
        dyn Fn(u32, &FetchRequest<'_>) -> Result<AdapterOutcome, AdapterError> + Send + Sync,
    >,
    /// Simulated per-call latency.
    pub latency: Duration,
}

impl ScriptedAdapter {
    pub fn new(
        id: SourceId,
        script: impl Fn(u32, &FetchRequest<'_>) -> Result<AdapterOutcome, AdapterError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            id,
            calls: AtomicU32::new(0),
            call_times: std::sync::Mutex::new(Vec::new()),
            script: Box::new(script),
            latency: Duration::ZERO,
        }
    }

    /// Always returns a regulator-grade record for the requested period.
    pub fn regulator_ok(id: SourceId) -> Self {
        Self::new(id, |_, req| {
            Ok(AdapterOutcome::Record(Box::new(regulator_record(
                req.ticker,
                req.fiscal_year,
            ))))
        })
    }

    /// Always rejects the credential.
    pub fn auth_failed(id: SourceId) -> Self {
        Self::new(id, move |_, _| {
            Err(AdapterError {
                source: id,
                kind: AdapterErrorKind::AuthFailed,
                message: "key rejected".to_string(),
            })
        })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn id(&self) -> SourceId {
        self.id
    }

    async fn fetch(&self, req: FetchRequest<'_>) -> Result<AdapterOutcome, AdapterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.script)(call, &req)
    }
}

/// Config wired to temp paths with fast retries, suitable for scripted runs.
pub fn test_config(dir: &tempfile::TempDir, region: Region, start: i32, end: i32) -> BackfillConfig {
    let mut config = BackfillConfig::new(region, start, end);
    config.mode = Mode::Full;
    config.universe = UniverseSelection::All;
    config.backoff_base = Duration::from_millis(10);
    config.backoff_cap = Duration::from_millis(50);
    config.adapter_timeout = Duration::from_secs(5);
    config.checkpoint_path = dir.path().join("checkpoint.json");
    config.report_dir = dir.path().join("reports");
    config
}

/// A governor with negligible throttling for every source.
pub fn open_governor() -> RateGovernor {
    RateGovernor::new(SourceId::ALL.iter().map(|&s| {
        (
            s,
            RateSpec {
                capacity: 100,
                refill_per_sec: 10_000.0,
                min_interval: Duration::ZERO,
            },
        )
    }))
}

pub fn adapters_of(
    pairs: impl IntoIterator<Item = (SourceId, Arc<dyn SourceAdapter>)>,
) -> HashMap<SourceId, Arc<dyn SourceAdapter>> {
    pairs.into_iter().collect()
}
