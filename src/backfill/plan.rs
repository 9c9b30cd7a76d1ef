//! Work-plan construction and filtering.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Identity, PeriodType, Region, SourceId, Ticker, provenance_rank};

/// One `(ticker, fiscal period)` unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub ticker: String,
    pub region: Region,
    pub fiscal_year: i32,
    pub period_type: PeriodType,
}

impl WorkUnit {
    /// Stable key used in the checkpoint's status map.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.ticker,
            self.region.code(),
            self.fiscal_year,
            self.period_type.as_str()
        )
    }

    /// The store identity this unit would write.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            ticker: self.ticker.clone(),
            region: self.region,
            fiscal_year: Some(self.fiscal_year),
            period_type: self.period_type,
        }
    }
}

/// Lifecycle of a unit within one run (and across resumes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Pending,
    InProgress,
    /// Fetched and upserted.
    Ok,
    /// Never dispatched: source poisoned, or already satisfied in the store.
    Skipped,
    /// Provider acknowledged the request but has nothing for this period.
    NotAvailable,
    /// Retry cap exhausted on a retryable failure.
    FailedRetryable,
    /// Terminal failure (malformed response, validation rejection).
    FailedFatal,
}

impl UnitStatus {
    /// Terminal states survive a resume; the rest are re-dispatched.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Ok | Self::Skipped | Self::NotAvailable | Self::FailedRetryable | Self::FailedFatal
        )
    }
}

/// Checkpointed per-unit progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitState {
    pub status: UnitStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub source: Option<SourceId>,
}

impl Default for UnitState {
    fn default() -> Self {
        Self {
            status: UnitStatus::Pending,
            attempts: 0,
            last_error: None,
            last_attempt: None,
            source: None,
        }
    }
}

/// The Cartesian work set: every requested period of every fiscal year for
/// every ticker in the universe. Malformed symbols are dropped with a
/// warning rather than poisoning the run later.
pub fn build_units(
    tickers: &[Ticker],
    start_year: i32,
    end_year: i32,
    periods: &[PeriodType],
) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    for ticker in tickers {
        if !ticker.region.symbol_is_valid(&ticker.symbol) {
            tracing::warn!(symbol = %ticker.symbol, region = %ticker.region, "skipping malformed symbol");
            continue;
        }
        for year in start_year..=end_year {
            for &period_type in periods {
                if !period_type.wants_fiscal_year() {
                    continue;
                }
                units.push(WorkUnit {
                    ticker: ticker.symbol.clone(),
                    region: ticker.region,
                    fiscal_year: year,
                    period_type,
                });
            }
        }
    }
    units
}

/// Splits planned units into (dispatch, skip) for an incremental run: a
/// unit is skipped when its identity already exists with provenance rank
/// at least as good as the best the selected sources could deliver.
pub fn filter_incremental(
    units: Vec<WorkUnit>,
    existing: &HashMap<Identity, String>,
    sources: &[SourceId],
) -> (Vec<WorkUnit>, Vec<WorkUnit>) {
    let best_rank = sources.iter().map(|s| s.rank()).max().unwrap_or(0);
    units.into_iter().partition(|unit| {
        existing
            .get(&unit.identity())
            .is_none_or(|stored| provenance_rank(stored) < best_rank)
    })
}
