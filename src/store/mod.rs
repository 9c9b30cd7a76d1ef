//! The fundamentals store seam.
//!
//! The engine only ever speaks to [`FundamentalsStore`]; the Postgres
//! implementation backs production runs while the in-memory one backs
//! tests and `--dry-run`. Physical layout concerns of the production table
//! (monthly time partitioning, compression of chunks older than a year,
//! secondary indexes on `(region, fiscal_year)` and
//! `(ticker, region, report_date DESC)`) live in the externally managed
//! schema migrations, not here.

pub mod mem;
pub mod pg;
mod upsert;

pub use mem::MemStore;
pub use pg::PgStore;
pub use upsert::{MergeDecision, UpsertEngine, UpsertOutcome, merge};

use std::collections::HashMap;
use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::{FundamentalRecord, Identity, PeriodType, Region, Ticker};

/// Store failures, split by how the orchestrator must react.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection-level trouble; the unit retries with backoff.
    #[error("transient store error: {0}")]
    Transient(String),

    /// The conflict target did not absorb a duplicate key. Unexpected with
    /// a correct schema; treated as fatal.
    #[error("unique violation: {0}")]
    UniqueViolation(String),

    /// The live schema does not match this build; aborts the run.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl StoreError {
    /// Whether the operation may be retried with the same arguments.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A canonical record together with its write timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: FundamentalRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Universe selection for registry reads.
#[derive(Debug, Clone)]
pub struct UniverseFilter {
    pub region: Region,
    /// Explicit symbol list; `None` means the whole region.
    pub symbols: Option<Vec<String>>,
    /// Keep only the N largest by market cap.
    pub top_by_market_cap: Option<usize>,
    /// Drop delisted/inactive tickers.
    pub active_only: bool,
}

impl UniverseFilter {
    /// All active tickers of a region.
    #[must_use]
    pub fn all_active(region: Region) -> Self {
        Self {
            region,
            symbols: None,
            top_by_market_cap: None,
            active_only: true,
        }
    }
}

/// Durable, queryable storage of fundamentals rows plus read access to the
/// externally populated ticker registry.
#[async_trait]
pub trait FundamentalsStore: Send + Sync {
    /// Reads the row for one identity, if present.
    async fn get(&self, id: &Identity) -> Result<Option<StoredRecord>, StoreError>;

    /// Writes a pre-merged row image; replaces any row with the same
    /// identity in one native conflict-on-key statement.
    async fn put(&self, row: StoredRecord) -> Result<(), StoreError>;

    /// Writes a batch atomically; a failure leaves no partial state.
    async fn put_batch(&self, rows: Vec<StoredRecord>) -> Result<(), StoreError>;

    /// The `data_source` tags of rows already present for a region and
    /// year range, keyed by identity. Drives incremental planning.
    async fn existing_identities(
        &self,
        region: Region,
        years: RangeInclusive<i32>,
        period_types: &[PeriodType],
    ) -> Result<HashMap<Identity, String>, StoreError>;

    /// Reads the ticker registry.
    async fn tickers(&self, filter: &UniverseFilter) -> Result<Vec<Ticker>, StoreError>;
}
