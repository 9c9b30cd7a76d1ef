//! Market-data helper adapter (Korean exchange daily valuation snapshot).
//!
//! Ratios only: per/pbr, dividend per share, close price, market cap and
//! listed shares as of the period end. No statement lines; those belong to
//! the regulator adapter. Moderate rate (one whole-market snapshot per
//! request).

mod wire;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use url::Url;

use crate::adapter::wire::{parse_grouped_f64, parse_grouped_i64};
use crate::adapter::{AdapterError, AdapterOutcome, FetchRequest, SourceAdapter};
use crate::core::{FillError, FundamentalRecord, PeriodType, Region, SourceId};

use wire::MarketSnapshot;

const DEFAULT_BASE: &str = "https://data.krx.co.kr/comm/bldAttendant/getJsonData.cmd";
const VALUATION_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT03501";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/* column ids per canonical field, older endpoint generations second */
const COL_TICKER: &[&str] = &["ISU_SRT_CD", "ISU_CD"];
const COL_CLOSE: &[&str] = &["TDD_CLSPRC", "CLSPRC"];
const COL_PER: &[&str] = &["PER"];
const COL_PBR: &[&str] = &["PBR"];
const COL_DPS: &[&str] = &["DPS"];
const COL_MKTCAP: &[&str] = &["MKTCAP"];
const COL_LIST_SHRS: &[&str] = &["LIST_SHRS"];

/// Snapshot date for a fiscal period: the nominal period-end day. The
/// exchange answers with the nearest preceding trading day's figures.
fn snapshot_date(year: i32, period: PeriodType) -> Option<NaiveDate> {
    match period {
        PeriodType::Annual => NaiveDate::from_ymd_opt(year, 12, 31),
        PeriodType::SemiAnnual | PeriodType::Q2 => NaiveDate::from_ymd_opt(year, 6, 30),
        PeriodType::Q1 => NaiveDate::from_ymd_opt(year, 3, 31),
        PeriodType::Q3 => NaiveDate::from_ymd_opt(year, 9, 30),
        PeriodType::Daily => None,
    }
}

/// Adapter for the exchange's valuation snapshot endpoint.
pub struct KrxAdapter {
    http: Client,
    base: Url,
}

impl KrxAdapter {
    /// Create a new builder.
    pub fn builder() -> KrxAdapterBuilder {
        KrxAdapterBuilder::default()
    }

    fn pick<'a>(
        row: &'a HashMap<String, serde_json::Value>,
        synonyms: &[&str],
    ) -> Option<&'a str> {
        synonyms
            .iter()
            .find_map(|col| row.get(*col).and_then(serde_json::Value::as_str))
    }
}

#[async_trait]
impl SourceAdapter for KrxAdapter {
    fn id(&self) -> SourceId {
        SourceId::Krx
    }

    async fn fetch(&self, req: FetchRequest<'_>) -> Result<AdapterOutcome, AdapterError> {
        if req.region != Region::Kr {
            return Ok(AdapterOutcome::Empty);
        }
        let Some(date) = snapshot_date(req.fiscal_year, req.period_type) else {
            return Ok(AdapterOutcome::Empty);
        };

        let form = [
            ("bld", VALUATION_BLD.to_string()),
            ("mktId", "ALL".to_string()),
            ("trdDd", date.format("%Y%m%d").to_string()),
        ];
        let resp = self
            .http
            .post(self.base.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AdapterError::from_http(SourceId::Krx, &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(
                SourceId::Krx,
                status.as_u16(),
                &self.base,
            ));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| AdapterError::from_http(SourceId::Krx, &e))?;
        let snapshot: MarketSnapshot = serde_json::from_str(&body).map_err(|e| {
            AdapterError::malformed(SourceId::Krx, format!("snapshot parse: {e}"))
        })?;

        let Some(row) = snapshot
            .output
            .iter()
            .find(|row| Self::pick(row, COL_TICKER) == Some(req.ticker))
        else {
            return Ok(AdapterOutcome::Empty);
        };

        let mut rec = FundamentalRecord::bare(
            req.ticker,
            Region::Kr,
            Some(req.fiscal_year),
            req.period_type,
            SourceId::Krx.tag(),
        );
        rec.report_date = Some(date);
        rec.per = Self::pick(row, COL_PER).and_then(parse_grouped_f64);
        rec.pbr = Self::pick(row, COL_PBR).and_then(parse_grouped_f64);
        rec.dividend_per_share = Self::pick(row, COL_DPS).and_then(parse_grouped_f64);
        rec.close_price = Self::pick(row, COL_CLOSE).and_then(parse_grouped_f64);
        rec.market_cap = Self::pick(row, COL_MKTCAP).and_then(parse_grouped_i64);
        rec.shares_outstanding = Self::pick(row, COL_LIST_SHRS).and_then(parse_grouped_i64);

        Ok(AdapterOutcome::Record(Box::new(rec)))
    }
}

/* ----------------------- Builder ----------------------- */

/// Builder for [`KrxAdapter`].
#[derive(Default)]
pub struct KrxAdapterBuilder {
    base: Option<Url>,
    timeout: Option<Duration>,
}

impl KrxAdapterBuilder {
    /// Override the snapshot endpoint (e.g., for a mock server in tests).
    #[must_use]
    pub fn base_url(mut self, url: Url) -> Self {
        self.base = Some(url);
        self
    }

    /// Per-request transport timeout. Default: 30s.
    #[must_use]
    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }

    pub fn build(self) -> Result<KrxAdapter, FillError> {
        let base = match self.base {
            Some(u) => u,
            None => Url::parse(DEFAULT_BASE)?,
        };
        let http = Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;
        Ok(KrxAdapter { http, base })
    }
}
