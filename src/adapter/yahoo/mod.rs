//! Global fallback adapter (Yahoo Finance fundamentals timeseries).
//!
//! Partial statements plus derivable ratios for any region, lenient rate.
//! The timeseries surface only exposes clean history for annual statement
//! types, so interim periods come back `Empty` and stay with the
//! region-native sources.

mod wire;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::Client;
use url::Url;

use crate::adapter::{AdapterError, AdapterOutcome, FetchRequest, SourceAdapter};
use crate::core::{FillError, FundamentalRecord, PeriodType, Region, SourceId};

use wire::{TimeseriesEntry, TimeseriesEnvelope};

const DEFAULT_BASE: &str =
    "https://query1.finance.yahoo.com/ws/fundamentals-timeseries/v1/finance/timeseries/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/* timeseries type keys per canonical field, preferred variant first */
const T_REVENUE: &[&str] = &["annualTotalRevenue", "annualOperatingRevenue"];
const T_COGS: &[&str] = &["annualCostOfRevenue"];
const T_GROSS_PROFIT: &[&str] = &["annualGrossProfit"];
const T_OPERATING_PROFIT: &[&str] = &["annualOperatingIncome"];
const T_NET_INCOME: &[&str] = &["annualNetIncome", "annualNetIncomeCommonStockholders"];
const T_EBITDA: &[&str] = &["annualEBITDA", "annualNormalizedEBITDA"];
const T_INTEREST_EXPENSE: &[&str] = &["annualInterestExpense"];
const T_TOTAL_ASSETS: &[&str] = &["annualTotalAssets"];
const T_TOTAL_LIABILITIES: &[&str] = &["annualTotalLiabilitiesNetMinorityInterest"];
const T_TOTAL_EQUITY: &[&str] = &[
    "annualStockholdersEquity",
    "annualTotalEquityGrossMinorityInterest",
];
const T_CURRENT_ASSETS: &[&str] = &["annualCurrentAssets"];
const T_CURRENT_LIABILITIES: &[&str] = &["annualCurrentLiabilities"];
const T_INVENTORY: &[&str] = &["annualInventory"];
const T_INVESTING_CF: &[&str] = &["annualInvestingCashFlow"];
const T_FINANCING_CF: &[&str] = &["annualFinancingCashFlow"];
const T_SHARES: &[&str] = &["annualBasicAverageShares", "annualDilutedAverageShares"];

const ALL_TYPES: &[&[&str]] = &[
    T_REVENUE,
    T_COGS,
    T_GROSS_PROFIT,
    T_OPERATING_PROFIT,
    T_NET_INCOME,
    T_EBITDA,
    T_INTEREST_EXPENSE,
    T_TOTAL_ASSETS,
    T_TOTAL_LIABILITIES,
    T_TOTAL_EQUITY,
    T_CURRENT_ASSETS,
    T_CURRENT_LIABILITIES,
    T_INVENTORY,
    T_INVESTING_CF,
    T_FINANCING_CF,
    T_SHARES,
];

/// Yahoo's symbol form for a regional ticker: US symbols pass through,
/// KR/VN codes gain their venue suffix, CN/HK/JP already carry one.
fn yahoo_symbol(region: Region, ticker: &str) -> String {
    match region {
        Region::Kr => format!("{ticker}.KS"),
        Region::Vn => format!("{ticker}.VN"),
        _ => ticker.to_string(),
    }
}

/// Adapter for the fundamentals timeseries endpoint.
pub struct YahooAdapter {
    http: Client,
    base: Url,
}

impl YahooAdapter {
    /// Create a new builder.
    pub fn builder() -> YahooAdapterBuilder {
        YahooAdapterBuilder::default()
    }

    fn request_url(&self, symbol: &str, fiscal_year: i32) -> Result<Url, AdapterError> {
        let mut url = self
            .base
            .join(symbol)
            .map_err(|e| AdapterError::malformed(SourceId::Yahoo, e.to_string()))?;

        let types: Vec<&str> = ALL_TYPES.iter().flat_map(|t| t.iter().copied()).collect();
        // off-calendar fiscal years can end up to half a year either side
        let period1 = NaiveDate::from_ymd_opt(fiscal_year - 1, 7, 1)
            .unwrap_or_default()
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc()
            .timestamp();
        let period2 = NaiveDate::from_ymd_opt(fiscal_year + 1, 6, 30)
            .unwrap_or_default()
            .and_hms_opt(23, 59, 59)
            .unwrap_or_default()
            .and_utc()
            .timestamp();

        url.query_pairs_mut()
            .append_pair("symbol", symbol)
            .append_pair("type", &types.join(","))
            .append_pair("period1", &period1.to_string())
            .append_pair("period2", &period2.to_string());
        Ok(url)
    }
}

/// The observation for `fiscal_year` under the first synonym that has one.
fn value_for_year(
    by_type: &HashMap<String, Vec<TimeseriesEntry>>,
    synonyms: &[&str],
    fiscal_year: i32,
) -> Option<(f64, Option<NaiveDate>)> {
    synonyms.iter().find_map(|key| {
        by_type.get(*key)?.iter().find_map(|entry| {
            let date = entry
                .as_of_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
            if date.is_none_or(|d| d.year() != fiscal_year) {
                return None;
            }
            let raw = entry.reported_value.as_ref().and_then(|rv| rv.raw)?;
            Some((raw, date))
        })
    })
}

fn as_amount(v: Option<(f64, Option<NaiveDate>)>) -> Option<i64> {
    v.map(|(raw, _)| raw.round() as i64)
}

#[async_trait]
impl SourceAdapter for YahooAdapter {
    fn id(&self) -> SourceId {
        SourceId::Yahoo
    }

    async fn fetch(&self, req: FetchRequest<'_>) -> Result<AdapterOutcome, AdapterError> {
        if req.period_type != PeriodType::Annual {
            return Ok(AdapterOutcome::Empty);
        }
        let symbol = yahoo_symbol(req.region, req.ticker);
        let url = self.request_url(&symbol, req.fiscal_year)?;

        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AdapterError::from_http(SourceId::Yahoo, &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(
                SourceId::Yahoo,
                status.as_u16(),
                &url,
            ));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| AdapterError::from_http(SourceId::Yahoo, &e))?;
        let envelope: TimeseriesEnvelope = serde_json::from_str(&body).map_err(|e| {
            AdapterError::malformed(SourceId::Yahoo, format!("timeseries parse: {e}"))
        })?;

        let results = envelope
            .timeseries
            .and_then(|ts| ts.result)
            .unwrap_or_default();

        // each result element carries one type key; collect them all
        let mut by_type: HashMap<String, Vec<TimeseriesEntry>> = HashMap::new();
        for data in results {
            for (key, value) in data.values {
                let Ok(entries) =
                    serde_json::from_value::<Vec<Option<TimeseriesEntry>>>(value)
                else {
                    continue;
                };
                by_type
                    .entry(key)
                    .or_default()
                    .extend(entries.into_iter().flatten());
            }
        }
        if by_type.is_empty() {
            return Ok(AdapterOutcome::Empty);
        }

        let year = req.fiscal_year;
        let revenue = value_for_year(&by_type, T_REVENUE, year);
        let report_date = revenue.and_then(|(_, d)| d).or_else(|| {
            value_for_year(&by_type, T_TOTAL_ASSETS, year).and_then(|(_, d)| d)
        });

        let mut rec = FundamentalRecord::bare(
            req.ticker,
            req.region,
            Some(year),
            PeriodType::Annual,
            SourceId::Yahoo.tag(),
        );
        rec.report_date = report_date;
        rec.revenue = as_amount(revenue);
        rec.cogs = as_amount(value_for_year(&by_type, T_COGS, year));
        rec.gross_profit = as_amount(value_for_year(&by_type, T_GROSS_PROFIT, year));
        rec.operating_profit = as_amount(value_for_year(&by_type, T_OPERATING_PROFIT, year));
        rec.net_income = as_amount(value_for_year(&by_type, T_NET_INCOME, year));
        rec.ebitda = as_amount(value_for_year(&by_type, T_EBITDA, year));
        rec.interest_expense = as_amount(value_for_year(&by_type, T_INTEREST_EXPENSE, year));
        rec.total_assets = as_amount(value_for_year(&by_type, T_TOTAL_ASSETS, year));
        rec.total_liabilities = as_amount(value_for_year(&by_type, T_TOTAL_LIABILITIES, year));
        rec.total_equity = as_amount(value_for_year(&by_type, T_TOTAL_EQUITY, year));
        rec.current_assets = as_amount(value_for_year(&by_type, T_CURRENT_ASSETS, year));
        rec.current_liabilities = as_amount(value_for_year(&by_type, T_CURRENT_LIABILITIES, year));
        rec.inventory = as_amount(value_for_year(&by_type, T_INVENTORY, year));
        rec.investing_cf = as_amount(value_for_year(&by_type, T_INVESTING_CF, year));
        rec.financing_cf = as_amount(value_for_year(&by_type, T_FINANCING_CF, year));
        rec.shares_outstanding = as_amount(value_for_year(&by_type, T_SHARES, year));

        derive_ratios(&mut rec);

        let any_field = [
            rec.revenue,
            rec.net_income,
            rec.total_assets,
            rec.total_equity,
        ]
        .iter()
        .any(Option::is_some);
        if !any_field {
            return Ok(AdapterOutcome::Empty);
        }
        Ok(AdapterOutcome::Record(Box::new(rec)))
    }
}

/// Fills the ratio block from whatever statement fields landed.
fn derive_ratios(rec: &mut FundamentalRecord) {
    let ratio = |num: Option<i64>, den: Option<i64>| -> Option<f64> {
        match (num, den) {
            (Some(n), Some(d)) if d != 0 => Some(n as f64 / d as f64),
            _ => None,
        }
    };
    rec.roe = ratio(rec.net_income, rec.total_equity);
    rec.roa = ratio(rec.net_income, rec.total_assets);
    rec.debt_ratio = ratio(rec.total_liabilities, rec.total_equity);
    rec.ebitda_margin = ratio(rec.ebitda, rec.revenue);
}

/* ----------------------- Builder ----------------------- */

/// Builder for [`YahooAdapter`].
#[derive(Default)]
pub struct YahooAdapterBuilder {
    base: Option<Url>,
    timeout: Option<Duration>,
}

impl YahooAdapterBuilder {
    /// Override the timeseries base (e.g., for a mock server in tests).
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

    pub fn build(self) -> Result<YahooAdapter, FillError> {
        let base = match self.base {
            Some(u) => u,
            None => Url::parse(DEFAULT_BASE)?,
        };
        let http = Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;
        Ok(YahooAdapter { http, base })
    }
}
