//! The backfill orchestrator.
//!
//! Drives a full or incremental backfill to completion with bounded
//! resource use: builds the work plan, dispatches units under global and
//! per-source concurrency caps, throttles every outbound call through the
//! rate governor, retries transient failures with exponential backoff,
//! funnels all writes through one writer task so merge order stays
//! deterministic, and flushes a resumable checkpoint as it goes.

pub mod checkpoint;
pub mod plan;
pub mod report;

pub use checkpoint::Checkpoint;
pub use plan::{UnitState, UnitStatus, WorkUnit};
pub use report::{RunReport, RunSummary, SourceStats, Statistics};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::adapter::{AdapterErrorKind, AdapterOutcome, FetchRequest, SourceAdapter};
use crate::core::{
    FillError, FundamentalRecord, PeriodType, Region, SourceId, Ticker, default_sources,
};
use crate::governor::RateGovernor;
use crate::store::{FundamentalsStore, StoreError, UniverseFilter, UpsertEngine, UpsertOutcome};

use plan::{build_units, filter_incremental};
use report::{ReportParameters, StatsSink};

/// How the plan treats rows that already exist in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Attempt every planned unit; conflict resolution sorts out the rest.
    Full,
    /// Skip identities already stored with provenance at least as good as
    /// the selected sources could produce.
    Incremental,
    /// Attempt everything, even freshly written rows.
    ForceRefresh,
}

impl Mode {
    /// CLI spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::ForceRefresh => "force-refresh",
        }
    }

    /// Parses the CLI spelling.
    pub fn parse(s: &str) -> Result<Self, FillError> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            "force-refresh" | "force_refresh" => Ok(Self::ForceRefresh),
            other => Err(FillError::InvalidParams(format!("unknown mode: {other}"))),
        }
    }
}

/// Which tickers to backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniverseSelection {
    /// An explicit symbol list.
    Explicit(Vec<String>),
    /// The N largest by market cap in the registry.
    Top(usize),
    /// Every active ticker of the region.
    All,
}

/// Everything a run needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub region: Region,
    pub universe: UniverseSelection,
    pub start_year: i32,
    pub end_year: i32,
    /// Statement periods to plan; ANNUAL unless interim periods were
    /// explicitly requested.
    pub periods: Vec<PeriodType>,
    /// Source priority; empty means the region default.
    pub sources: Vec<SourceId>,
    pub mode: Mode,
    pub global_concurrency: usize,
    /// Per-source in-flight cap; sources not listed default to 1.
    pub per_source_concurrency: HashMap<SourceId, usize>,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub adapter_timeout: Duration,
    /// Re-dispatch terminal-not-found units through the next source.
    pub fallback: bool,
    pub checkpoint_path: PathBuf,
    /// Flush the checkpoint every N completed units…
    pub checkpoint_every: usize,
    /// …or after this long, whichever comes first.
    pub checkpoint_interval: Duration,
    pub report_dir: PathBuf,
    pub dry_run: bool,
    /// How long in-flight units get to finish after an interrupt.
    pub shutdown_grace: Duration,
}

impl BackfillConfig {
    /// Sensible defaults for one region and year range.
    #[must_use]
    pub fn new(region: Region, start_year: i32, end_year: i32) -> Self {
        Self {
            region,
            universe: UniverseSelection::All,
            start_year,
            end_year,
            periods: vec![PeriodType::Annual],
            sources: Vec::new(),
            mode: Mode::Incremental,
            global_concurrency: 8,
            per_source_concurrency: HashMap::from([
                (SourceId::Dart, 1),
                (SourceId::Krx, 1),
                (SourceId::Yahoo, 4),
            ]),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            adapter_timeout: Duration::from_secs(60),
            fallback: false,
            checkpoint_path: PathBuf::from("backfill_checkpoint.json"),
            checkpoint_every: 50,
            checkpoint_interval: Duration::from_secs(30),
            report_dir: PathBuf::from("reports"),
            dry_run: false,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/* ---------------- shared dispatch state ---------------- */

#[derive(Default)]
struct PoisonSet {
    inner: Mutex<HashSet<SourceId>>,
}

impl PoisonSet {
    /// Returns true when the source was newly poisoned.
    fn poison(&self, source: SourceId) -> bool {
        self.inner.lock().expect("poison mutex").insert(source)
    }

    fn is_poisoned(&self, source: SourceId) -> bool {
        self.inner.lock().expect("poison mutex").contains(&source)
    }

    fn count(&self) -> usize {
        self.inner.lock().expect("poison mutex").len()
    }
}

struct WriteJob {
    record: FundamentalRecord,
    reply: oneshot::Sender<Result<UpsertOutcome, StoreError>>,
}

struct UnitCtx {
    adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
    sources: Vec<SourceId>,
    governor: Arc<RateGovernor>,
    global: Arc<Semaphore>,
    per_source: HashMap<SourceId, Arc<Semaphore>>,
    poisoned: Arc<PoisonSet>,
    stats: Arc<StatsSink>,
    write_tx: mpsc::Sender<WriteJob>,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    adapter_timeout: Duration,
    fallback: bool,
}

struct UnitResult {
    unit: WorkUnit,
    status: UnitStatus,
    attempts: u32,
    source: Option<SourceId>,
    error: Option<String>,
    fatal_store: Option<String>,
}

enum Attempt {
    Stored(UpsertOutcome),
    Empty,
    NotFound(String),
    RetryExhausted(String),
    Malformed(String),
    AuthFailed(String),
    FatalStore(String),
    Poisoned,
    Cancelled,
}

/// Exponential backoff with a cap and mild jitter.
fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(cap);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());
    // 0.75x..1.25x so synchronized retries drift apart
    capped.mul_f64(0.75 + f64::from(nanos % 500) / 1000.0)
}

async fn attempt_source(
    ctx: &UnitCtx,
    unit: &WorkUnit,
    source: SourceId,
    cancel: &mut watch::Receiver<bool>,
    attempts_total: &mut u32,
) -> Attempt {
    let Some(adapter) = ctx.adapters.get(&source).cloned() else {
        return Attempt::NotFound(format!("no adapter configured for {source}"));
    };
    let Some(sem) = ctx.per_source.get(&source).cloned() else {
        return Attempt::NotFound(format!("no concurrency lane for {source}"));
    };

    let mut last_error = String::new();
    for attempt in 1..=ctx.max_attempts {
        if *cancel.borrow() {
            return Attempt::Cancelled;
        }

        let permit = tokio::select! {
            p = sem.clone().acquire_owned() => match p {
                Ok(p) => p,
                Err(_) => return Attempt::Cancelled,
            },
            _ = cancel.changed() => return Attempt::Cancelled,
        };
        if ctx.poisoned.is_poisoned(source) {
            return Attempt::Poisoned;
        }
        tokio::select! {
            () = ctx.governor.acquire(source) => {},
            _ = cancel.changed() => return Attempt::Cancelled,
        }

        *attempts_total += 1;
        let req = FetchRequest {
            ticker: &unit.ticker,
            region: unit.region,
            fiscal_year: unit.fiscal_year,
            period_type: unit.period_type,
        };
        let fetched = tokio::select! {
            r = tokio::time::timeout(ctx.adapter_timeout, adapter.fetch(req)) => r,
            _ = cancel.changed() => return Attempt::Cancelled,
        };
        drop(permit);

        match fetched {
            Err(_elapsed) => {
                ctx.stats.bump(source, |s| &mut s.transient);
                last_error = format!("{source} adapter timed out");
                tracing::debug!(unit = %unit.key(), attempt, "adapter timeout");
            }
            Ok(Ok(AdapterOutcome::Record(record))) => {
                ctx.stats.bump(source, |s| &mut s.ok);
                let (reply_tx, reply_rx) = oneshot::channel();
                let job = WriteJob {
                    record: *record,
                    reply: reply_tx,
                };
                if ctx.write_tx.send(job).await.is_err() {
                    return Attempt::Cancelled;
                }
                match reply_rx.await {
                    Err(_) => return Attempt::Cancelled,
                    Ok(Ok(outcome)) => return Attempt::Stored(outcome),
                    Ok(Err(e)) if e.is_retryable() => {
                        last_error = e.to_string();
                        tracing::debug!(unit = %unit.key(), attempt, error = %last_error, "transient store error");
                    }
                    Ok(Err(e)) => return Attempt::FatalStore(e.to_string()),
                }
            }
            Ok(Ok(AdapterOutcome::Empty)) => {
                ctx.stats.bump(source, |s| &mut s.empty);
                return Attempt::Empty;
            }
            Ok(Err(e)) => match e.kind {
                AdapterErrorKind::Throttled => {
                    ctx.stats.bump(source, |s| &mut s.throttled);
                    last_error = e.to_string();
                }
                AdapterErrorKind::Transient => {
                    ctx.stats.bump(source, |s| &mut s.transient);
                    last_error = e.to_string();
                }
                AdapterErrorKind::NotFound => {
                    ctx.stats.bump(source, |s| &mut s.not_found);
                    return Attempt::NotFound(e.to_string());
                }
                AdapterErrorKind::MalformedResponse => {
                    tracing::warn!(unit = %unit.key(), error = %e, "malformed provider response");
                    return Attempt::Malformed(e.to_string());
                }
                AdapterErrorKind::AuthFailed => {
                    ctx.stats.bump(source, |s| &mut s.auth_failed);
                    if ctx.poisoned.poison(source) {
                        tracing::warn!(%source, error = %e, "source poisoned for the rest of the run");
                    }
                    return Attempt::AuthFailed(e.to_string());
                }
            },
        }

        if attempt < ctx.max_attempts {
            let delay = backoff_delay(ctx.backoff_base, attempt, ctx.backoff_cap);
            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                _ = cancel.changed() => return Attempt::Cancelled,
            }
        }
    }
    Attempt::RetryExhausted(last_error)
}

async fn run_unit(
    ctx: Arc<UnitCtx>,
    unit: WorkUnit,
    mut cancel: watch::Receiver<bool>,
) -> UnitResult {
    let mut result = UnitResult {
        unit,
        status: UnitStatus::Pending,
        attempts: 0,
        source: None,
        error: None,
        fatal_store: None,
    };

    let _permit = tokio::select! {
        p = ctx.global.clone().acquire_owned() => match p {
            Ok(p) => p,
            Err(_) => return result,
        },
        _ = cancel.changed() => return result,
    };
    if *cancel.borrow() {
        return result;
    }

    for (idx, &source) in ctx.sources.iter().enumerate() {
        let has_next = ctx.fallback && idx + 1 < ctx.sources.len();
        result.source = Some(source);

        if ctx.poisoned.is_poisoned(source) {
            if has_next {
                continue;
            }
            result.status = UnitStatus::Skipped;
            result.error = Some(format!("{source} poisoned"));
            return result;
        }

        match attempt_source(&ctx, &result.unit, source, &mut cancel, &mut result.attempts).await {
            Attempt::Stored(UpsertOutcome::Rejected(reason)) => {
                result.status = UnitStatus::FailedFatal;
                result.error = Some(format!("validation: {reason}"));
                return result;
            }
            Attempt::Stored(_) => {
                result.status = UnitStatus::Ok;
                return result;
            }
            Attempt::Empty => {
                if has_next {
                    continue;
                }
                result.status = UnitStatus::NotAvailable;
                return result;
            }
            Attempt::NotFound(msg) => {
                result.error = Some(msg);
                if has_next {
                    continue;
                }
                result.status = UnitStatus::NotAvailable;
                return result;
            }
            Attempt::RetryExhausted(msg) => {
                result.status = UnitStatus::FailedRetryable;
                result.error = Some(msg);
                return result;
            }
            Attempt::Malformed(msg) => {
                result.status = UnitStatus::FailedFatal;
                result.error = Some(msg);
                return result;
            }
            Attempt::AuthFailed(msg) => {
                result.error = Some(msg);
                if has_next {
                    continue;
                }
                result.status = UnitStatus::Skipped;
                return result;
            }
            Attempt::Poisoned => {
                if has_next {
                    continue;
                }
                result.status = UnitStatus::Skipped;
                result.error = Some(format!("{source} poisoned"));
                return result;
            }
            Attempt::FatalStore(msg) => {
                // the write never landed; leave the unit pending so a
                // resumed run retries it once the store recovers
                result.status = UnitStatus::Pending;
                result.fatal_store = Some(msg);
                return result;
            }
            Attempt::Cancelled => {
                result.status = UnitStatus::Pending;
                return result;
            }
        }
    }

    result.status = UnitStatus::NotAvailable;
    result
}

/* ---------------- the orchestrator ---------------- */

/// Owns the adapters, the governor and the store seam for one run.
pub struct BackfillOrchestrator {
    config: BackfillConfig,
    adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
    governor: Arc<RateGovernor>,
    store: Arc<dyn FundamentalsStore>,
}

impl BackfillOrchestrator {
    /// Wires the collaborators together.
    pub fn new(
        config: BackfillConfig,
        adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
        governor: Arc<RateGovernor>,
        store: Arc<dyn FundamentalsStore>,
    ) -> Self {
        Self {
            config,
            adapters,
            governor,
            store,
        }
    }

    fn resolve_sources(&self) -> Result<Vec<SourceId>, FillError> {
        let requested = if self.config.sources.is_empty() {
            default_sources(self.config.region)
        } else {
            self.config.sources.clone()
        };
        let usable: Vec<SourceId> = requested
            .iter()
            .copied()
            .filter(|s| {
                let enabled = self.governor.is_enabled(*s);
                if !enabled {
                    tracing::warn!(source = %s, "source disabled by rate config");
                }
                enabled && self.adapters.contains_key(s)
            })
            .collect();
        if usable.is_empty() {
            return Err(FillError::InvalidParams(
                "no usable sources after filtering".to_string(),
            ));
        }
        Ok(usable)
    }

    async fn load_universe(&self) -> Result<Vec<Ticker>, FillError> {
        let filter = match &self.config.universe {
            UniverseSelection::Explicit(symbols) => UniverseFilter {
                region: self.config.region,
                symbols: Some(symbols.clone()),
                top_by_market_cap: None,
                active_only: false,
            },
            UniverseSelection::Top(n) => UniverseFilter {
                top_by_market_cap: Some(*n),
                ..UniverseFilter::all_active(self.config.region)
            },
            UniverseSelection::All => UniverseFilter::all_active(self.config.region),
        };
        let mut tickers = self.store.tickers(&filter).await?;

        // Explicit symbols missing from the registry are still attempted;
        // the registry is advisory for hand-picked lists.
        if let UniverseSelection::Explicit(symbols) = &self.config.universe {
            let known: HashSet<&str> = tickers.iter().map(|t| t.symbol.as_str()).collect();
            let missing: Vec<Ticker> = symbols
                .iter()
                .filter(|s| !known.contains(s.as_str()))
                .map(|s| Ticker {
                    symbol: s.clone(),
                    region: self.config.region,
                    name: None,
                    sector_code: None,
                    active: true,
                    listed_on: None,
                    delisted_on: None,
                    market_cap: None,
                })
                .collect();
            tickers.extend(missing);
        }
        Ok(tickers)
    }

    /// Runs the backfill to completion (or interruption) and returns the
    /// summary. `shutdown` flips to `true` on an interrupt request.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunSummary, FillError> {
        let started = Instant::now();
        let sources = self.resolve_sources()?;
        let tickers = self.load_universe().await?;

        let mut units = build_units(
            &tickers,
            self.config.start_year,
            self.config.end_year,
            &self.config.periods,
        );
        tracing::info!(
            units = units.len(),
            tickers = tickers.len(),
            sources = ?sources,
            mode = self.config.mode.as_str(),
            "plan built"
        );

        let mut report = RunReport {
            timestamp: Utc::now(),
            parameters: ReportParameters {
                region: self.config.region.code().to_string(),
                tickers: tickers.len() as u64,
                start_year: self.config.start_year,
                end_year: self.config.end_year,
                sources: sources.iter().map(|s| s.tag().to_string()).collect(),
                mode: self.config.mode.as_str().to_string(),
                concurrency: self.config.global_concurrency,
                dry_run: self.config.dry_run,
            },
            ..RunReport::default()
        };

        // resume: terminal units from a previous checkpoint leave the plan
        let mut cp = Checkpoint::load(&self.config.checkpoint_path)
            .await?
            .unwrap_or_default();
        let before_resume = units.len();
        units.retain(|u| {
            cp.units
                .get(&u.key())
                .is_none_or(|state| !state.status.is_terminal())
        });
        let resumed = before_resume - units.len();
        if resumed > 0 {
            tracing::info!(resumed, remaining = units.len(), "resuming from checkpoint");
        }

        // incremental: skip identities the store already covers well enough
        let mut skipped_units: u64 = 0;
        if self.config.mode == Mode::Incremental {
            let existing = self
                .store
                .existing_identities(
                    self.config.region,
                    self.config.start_year..=self.config.end_year,
                    &self.config.periods,
                )
                .await?;
            let (dispatch, skipped) = filter_incremental(units, &existing, &sources);
            units = dispatch;
            skipped_units = skipped.len() as u64;
            for unit in &skipped {
                cp.units.insert(
                    unit.key(),
                    UnitState {
                        status: UnitStatus::Skipped,
                        ..UnitState::default()
                    },
                );
            }
        }

        report.statistics.total_units = units.len() as u64 + skipped_units;
        report.statistics.skipped_units = skipped_units;

        if self.config.dry_run {
            report.statistics.duration_seconds = started.elapsed().as_secs_f64();
            let path = report.write_to(&self.config.report_dir).await?;
            tracing::info!(report = %path.display(), total_units = report.statistics.total_units, "dry run complete");
            return Ok(RunSummary {
                report,
                report_path: Some(path),
                ..RunSummary::default()
            });
        }

        self.dispatch(units, &sources, cp, report, shutdown, started)
            .await
    }

    #[allow(clippy::too_many_lines)]
    async fn dispatch(
        &self,
        units: Vec<WorkUnit>,
        sources: &[SourceId],
        mut cp: Checkpoint,
        mut report: RunReport,
        shutdown: watch::Receiver<bool>,
        started: Instant,
    ) -> Result<RunSummary, FillError> {
        // internal cancel = external interrupt OR fatal store error
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (interrupt_tx, mut interrupt_rx) = watch::channel(false);
        {
            let mut ext = shutdown;
            let cancel_tx = cancel_tx.clone();
            tokio::spawn(async move {
                let already = *ext.borrow();
                if already || ext.changed().await.is_ok() {
                    let _ = interrupt_tx.send(true);
                    let _ = cancel_tx.send(true);
                }
            });
        }

        // single writer task keeps conflict resolution deterministic
        let (write_tx, mut write_rx) = mpsc::channel::<WriteJob>(64);
        let engine = UpsertEngine::new(Arc::clone(&self.store));
        let writer = tokio::spawn(async move {
            while let Some(job) = write_rx.recv().await {
                let outcome = engine.upsert(job.record).await;
                let _ = job.reply.send(outcome);
            }
        });

        let per_source: HashMap<SourceId, Arc<Semaphore>> = sources
            .iter()
            .map(|&s| {
                let cap = self
                    .config
                    .per_source_concurrency
                    .get(&s)
                    .copied()
                    .unwrap_or(1)
                    .max(1);
                (s, Arc::new(Semaphore::new(cap)))
            })
            .collect();

        let poisoned = Arc::new(PoisonSet::default());
        let stats = Arc::new(StatsSink::default());
        let ctx = Arc::new(UnitCtx {
            adapters: self.adapters.clone(),
            sources: sources.to_vec(),
            governor: Arc::clone(&self.governor),
            global: Arc::new(Semaphore::new(self.config.global_concurrency.max(1))),
            per_source,
            poisoned: Arc::clone(&poisoned),
            stats: Arc::clone(&stats),
            write_tx,
            max_attempts: self.config.max_attempts.max(1),
            backoff_base: self.config.backoff_base,
            backoff_cap: self.config.backoff_cap,
            adapter_timeout: self.config.adapter_timeout,
            fallback: self.config.fallback,
        });

        let mut join_set = JoinSet::new();
        for unit in units {
            cp.units.entry(unit.key()).or_default().status = UnitStatus::InProgress;
            join_set.spawn(run_unit(Arc::clone(&ctx), unit, cancel_rx.clone()));
        }
        // the writer must see the channel close once the last unit is done
        drop(ctx);

        let mut fatal_store: Option<String> = None;
        let mut interrupted = false;
        let mut completed_since_flush = 0usize;
        let mut checkpoint_failures = 0u32;
        let mut flush_tick = tokio::time::interval(self.config.checkpoint_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut grace_deadline: Option<Instant> = None;

        loop {
            let mut abort_stragglers = false;
            tokio::select! {
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { break };
                    let Ok(result) = joined else {
                        // aborted task: its unit stays non-terminal for resume
                        continue;
                    };
                    absorb_result(&mut cp, &mut report, result, &mut fatal_store);
                    if fatal_store.is_some() {
                        let _ = cancel_tx.send(true);
                    }
                    completed_since_flush += 1;
                    if completed_since_flush >= self.config.checkpoint_every {
                        completed_since_flush = 0;
                        flush_checkpoint(&mut cp, &self.config.checkpoint_path, &mut checkpoint_failures).await?;
                    }
                }
                _ = flush_tick.tick() => {
                    if completed_since_flush > 0 {
                        completed_since_flush = 0;
                        flush_checkpoint(&mut cp, &self.config.checkpoint_path, &mut checkpoint_failures).await?;
                    }
                }
                changed = interrupt_rx.changed(), if !interrupted => {
                    if changed.is_ok() && *interrupt_rx.borrow() {
                        interrupted = true;
                        grace_deadline = Some(Instant::now() + self.config.shutdown_grace);
                        tracing::warn!(grace = ?self.config.shutdown_grace, "interrupt requested, draining in-flight units");
                    }
                }
                () = sleep_until_opt(grace_deadline), if grace_deadline.is_some() => {
                    tracing::warn!("grace period elapsed, aborting remaining units");
                    abort_stragglers = true;
                    grace_deadline = None;
                }
            }
            if abort_stragglers {
                join_set.abort_all();
            }
        }

        // all unit senders are gone; wait for the writer to drain
        let _ = writer.await;
        let interrupted = interrupted || *interrupt_rx.borrow();

        // anything still non-terminal goes back to pending for the resume
        for state in cp.units.values_mut() {
            if !state.status.is_terminal() {
                state.status = UnitStatus::Pending;
            }
        }
        let run_complete = !interrupted
            && fatal_store.is_none()
            && cp.units.values().all(|s| s.status.is_terminal());
        if run_complete {
            // the checkpoint only outlives incomplete runs
            match tokio::fs::remove_file(&self.config.checkpoint_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(error = %e, "could not remove completed checkpoint"),
            }
        } else {
            flush_checkpoint(&mut cp, &self.config.checkpoint_path, &mut checkpoint_failures)
                .await?;
        }

        report.statistics.by_source = stats.snapshot();
        report.statistics.duration_seconds = started.elapsed().as_secs_f64();
        let all_sources_auth_failed = poisoned.count() == sources.len();

        let path = report.write_to(&self.config.report_dir).await?;
        let s = &report.statistics;
        tracing::info!(
            report = %path.display(),
            total = s.total_units,
            ok = s.successful_units,
            skipped = s.skipped_units,
            failed = s.failed_units,
            not_available = s.not_available_units,
            duration_s = format!("{:.1}", s.duration_seconds),
            "backfill finished"
        );

        Ok(RunSummary {
            report_path: Some(path),
            report,
            interrupted,
            fatal_store_error: fatal_store,
            all_sources_auth_failed,
        })
    }
}

/// Sleeps until the deadline; only polled when the deadline is set.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn absorb_result(
    cp: &mut Checkpoint,
    report: &mut RunReport,
    result: UnitResult,
    fatal_store: &mut Option<String>,
) {
    let state = cp.units.entry(result.unit.key()).or_default();
    state.status = result.status;
    state.attempts += result.attempts;
    state.last_error = result.error.clone();
    state.last_attempt = Some(Utc::now());
    state.source = result.source;

    if let Some(msg) = result.fatal_store {
        tracing::error!(unit = %result.unit.key(), error = %msg, "fatal store error");
        fatal_store.get_or_insert(msg);
    }

    match result.status {
        UnitStatus::Ok => {
            report.statistics.successful_units += 1;
            report.record_result(&result.unit.ticker, result.unit.fiscal_year, true);
        }
        UnitStatus::Skipped => {
            report.statistics.skipped_units += 1;
        }
        UnitStatus::NotAvailable => {
            report.statistics.not_available_units += 1;
            report.record_result(&result.unit.ticker, result.unit.fiscal_year, false);
        }
        UnitStatus::FailedRetryable | UnitStatus::FailedFatal => {
            report.statistics.failed_units += 1;
            report.record_result(&result.unit.ticker, result.unit.fiscal_year, false);
        }
        UnitStatus::Pending | UnitStatus::InProgress => {
            // cancelled before completion; not counted this run
        }
    }
}

async fn flush_checkpoint(
    cp: &mut Checkpoint,
    path: &std::path::Path,
    consecutive_failures: &mut u32,
) -> Result<(), FillError> {
    cp.seq += 1;
    match cp.save(path).await {
        Ok(()) => {
            *consecutive_failures = 0;
            tracing::debug!(seq = cp.seq, "checkpoint flushed");
            Ok(())
        }
        Err(e) => {
            *consecutive_failures += 1;
            tracing::warn!(error = %e, failures = *consecutive_failures, "checkpoint flush failed");
            if *consecutive_failures >= 2 {
                return Err(e);
            }
            Ok(())
        }
    }
}
