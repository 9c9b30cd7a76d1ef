//! # fundfill
//!
//! A multi-source historical fundamentals backfill engine.
//!
//! `fundfill` populates a time-series fundamentals store for equity tickers
//! across regions (KR, US, JP, CN, HK, VN). It fans out to several external
//! data providers, parses heterogeneous financial statement payloads —
//! including multilingual statement labels — into one canonical schema,
//! enforces per-source rate limits, deduplicates through an idempotent
//! upsert key, and checkpoints progress so interrupted runs resume without
//! re-fetching.
//!
//! ## Components
//!
//! * **Rate governor** ([`governor`]): per-source token buckets honoring
//!   each provider's published request budget.
//! * **Source adapters** ([`adapter`]): one per provider behind a uniform
//!   contract — a regulator filing source (full statements, strict rate),
//!   a market-data helper (ratios only), and a global fallback.
//! * **Canonical store & upsert engine** ([`store`]): the fundamentals
//!   table seam with provenance-ranked conflict resolution; at most one
//!   row per `(ticker, region, fiscal_year, period_type)`.
//! * **Backfill orchestrator** ([`backfill`]): plan, bounded-concurrency
//!   dispatch, retries with backoff, checkpoint/resume, run report.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use fundfill::adapter::SourceAdapter;
//! use fundfill::adapter::yahoo::YahooAdapter;
//! use fundfill::backfill::{BackfillConfig, BackfillOrchestrator, Mode, UniverseSelection};
//! use fundfill::core::{Region, SourceId};
//! use fundfill::governor::RateGovernor;
//! use fundfill::store::MemStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = BackfillConfig::new(Region::Us, 2022, 2024);
//!     config.universe = UniverseSelection::Explicit(vec!["AAPL".into()]);
//!     config.sources = vec![SourceId::Yahoo];
//!     config.mode = Mode::Full;
//!
//!     let mut adapters: HashMap<SourceId, Arc<dyn SourceAdapter>> = HashMap::new();
//!     adapters.insert(SourceId::Yahoo, Arc::new(YahooAdapter::builder().build()?));
//!
//!     let orchestrator = BackfillOrchestrator::new(
//!         config,
//!         adapters,
//!         Arc::new(RateGovernor::with_defaults()),
//!         Arc::new(MemStore::new()),
//!     );
//!     let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//!     let summary = orchestrator.run(stop_rx).await?;
//!     println!("exit code {}", summary.exit_code());
//!     Ok(())
//! }
//! ```
/// Core types: the canonical record, regions, periods, sources, errors.
pub mod core;

/// Source adapters and their uniform contract.
pub mod adapter;
/// The backfill orchestrator: planning, dispatch, checkpointing, reporting.
pub mod backfill;
/// Per-source request budgets.
pub mod governor;
/// The fundamentals store seam and its implementations.
pub mod store;

// --- re-exports for the common surface ---
pub use adapter::{AdapterError, AdapterErrorKind, AdapterOutcome, FetchRequest, SourceAdapter};
pub use backfill::{
    BackfillConfig, BackfillOrchestrator, Checkpoint, Mode, RunReport, RunSummary,
    UniverseSelection, UnitStatus, WorkUnit,
};
pub use core::{
    FillError, FundamentalRecord, Identity, PeriodType, Region, RejectReason, SourceId, Ticker,
};
pub use governor::RateGovernor;
pub use store::{
    FundamentalsStore, MemStore, PgStore, StoreError, StoredRecord, UniverseFilter, UpsertEngine,
    UpsertOutcome,
};
