//! Run report emitted at the end of every backfill.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{FillError, SourceId};

/// Per-source response histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub ok: u64,
    pub empty: u64,
    pub throttled: u64,
    pub transient: u64,
    pub not_found: u64,
    pub auth_failed: u64,
}

/// Aggregate counters for the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_units: u64,
    pub successful_units: u64,
    pub skipped_units: u64,
    pub failed_units: u64,
    /// Units the providers acknowledged but had no data for; not failures.
    pub not_available_units: u64,
    pub by_source: BTreeMap<String, SourceStats>,
    pub duration_seconds: f64,
}

/// Echo of the invocation, for reproducibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportParameters {
    pub region: String,
    pub tickers: u64,
    pub start_year: i32,
    pub end_year: i32,
    pub sources: Vec<String>,
    pub mode: String,
    pub concurrency: usize,
    pub dry_run: bool,
}

/// The run report JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    pub parameters: ReportParameters,
    pub statistics: Statistics,
    /// ticker → fiscal year → whether the unit succeeded.
    pub results: BTreeMap<String, BTreeMap<i32, bool>>,
}

impl RunReport {
    /// Records one attempted unit's final success flag.
    pub fn record_result(&mut self, ticker: &str, fiscal_year: i32, success: bool) {
        self.results
            .entry(ticker.to_string())
            .or_default()
            .insert(fiscal_year, success);
    }

    /// Writes the report under `dir` and returns its path.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf, FillError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!(
            "backfill_report_{}.json",
            self.timestamp.format("%Y%m%dT%H%M%SZ")
        ));
        tokio::fs::write(&path, serde_json::to_vec_pretty(self)?).await?;
        Ok(path)
    }
}

/// Sources the run could not use at all, and how the run ended; drives the
/// process exit code.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub report: RunReport,
    pub report_path: Option<PathBuf>,
    pub interrupted: bool,
    pub fatal_store_error: Option<String>,
    /// True when every selected source got poisoned before serving a unit.
    pub all_sources_auth_failed: bool,
}

impl RunSummary {
    /// Exit code contract: 0 success, 2 partial, 3 fatal store error,
    /// 4 auth failed on all sources, 130 interrupted.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            return 130;
        }
        if self.fatal_store_error.is_some() {
            return 3;
        }
        if self.all_sources_auth_failed {
            return 4;
        }
        if self.report.statistics.failed_units > 0 {
            return 2;
        }
        0
    }
}

/// Aggregated per-source counters shared by in-flight unit tasks.
#[derive(Debug, Default)]
pub(crate) struct StatsSink {
    inner: std::sync::Mutex<HashMap<SourceId, SourceStats>>,
}

impl StatsSink {
    pub(crate) fn bump(&self, source: SourceId, pick: impl Fn(&mut SourceStats) -> &mut u64) {
        let mut inner = self.inner.lock().expect("stats mutex");
        *pick(inner.entry(source).or_default()) += 1;
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, SourceStats> {
        let inner = self.inner.lock().expect("stats mutex");
        inner
            .iter()
            .map(|(source, stats)| (source.tag().to_string(), *stats))
            .collect()
    }
}
