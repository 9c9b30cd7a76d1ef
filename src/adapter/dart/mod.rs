//! Regulator filing adapter (Korean Financial Supervisory Service, DART).
//!
//! Full statements, strict rate limit. The filing API is keyed by an
//! 8-digit `corp_code` rather than the exchange ticker; the mapping is
//! produced by the external ticker-registry process and injected here at
//! construction. Filings predating the provider's electronic-filing floor
//! come back as status `013`, which this adapter surfaces as `Empty` so the
//! orchestrator never retries them.

mod labels;
mod wire;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use url::Url;

use crate::adapter::wire::parse_grouped_i64;
use crate::adapter::{AdapterError, AdapterOutcome, FetchRequest, SourceAdapter};
use crate::core::{FillError, FundamentalRecord, PeriodType, Region, SourceId};

use wire::FnlttEnvelope;

const DEFAULT_BASE: &str = "https://opendart.fss.or.kr/api/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Regulator report codes. There is no standalone Q2 report; the half-year
/// filing covers it.
fn report_code(period: PeriodType) -> Option<&'static str> {
    match period {
        PeriodType::Annual => Some("11011"),
        PeriodType::SemiAnnual => Some("11012"),
        PeriodType::Q1 => Some("11013"),
        PeriodType::Q3 => Some("11014"),
        PeriodType::Q2 | PeriodType::Daily => None,
    }
}

/// Adapter for the regulator filing API.
pub struct DartAdapter {
    http: Client,
    base: Url,
    api_key: Option<String>,
    corp_codes: HashMap<String, String>,
}

impl DartAdapter {
    /// Create a new builder.
    pub fn builder() -> DartAdapterBuilder {
        DartAdapterBuilder::default()
    }

    fn resolve_corp_code(&self, ticker: &str) -> Option<&str> {
        self.corp_codes.get(ticker).map(String::as_str)
    }

    fn build_record(
        &self,
        req: FetchRequest<'_>,
        code: &str,
        rows: &[wire::FnlttRow],
    ) -> Option<FundamentalRecord> {
        // Consolidated statements win over separate ones when both appear.
        let has_cfs = rows
            .iter()
            .any(|r| r.fs_div.as_deref() == Some("CFS"));
        let by_label: HashMap<&str, &str> = rows
            .iter()
            .filter(|r| !has_cfs || r.fs_div.as_deref() == Some("CFS"))
            .filter_map(|r| {
                Some((r.account_nm.as_deref()?.trim(), r.thstrm_amount.as_deref()?))
            })
            .collect();

        let amount = |synonyms: &[&str]| -> Option<i64> {
            synonyms
                .iter()
                .find_map(|label| by_label.get(label).copied().and_then(parse_grouped_i64))
        };

        let mut rec = FundamentalRecord::bare(
            req.ticker,
            Region::Kr,
            Some(req.fiscal_year),
            req.period_type,
            format!("DART-{}-{}", req.fiscal_year, code),
        );

        rec.total_assets = amount(labels::TOTAL_ASSETS);
        rec.total_liabilities = amount(labels::TOTAL_LIABILITIES);
        rec.total_equity = amount(labels::TOTAL_EQUITY);
        rec.current_assets = amount(labels::CURRENT_ASSETS);
        rec.current_liabilities = amount(labels::CURRENT_LIABILITIES);
        rec.inventory = amount(labels::INVENTORY);
        rec.accounts_receivable = amount(labels::ACCOUNTS_RECEIVABLE);
        rec.pp_and_e = amount(labels::PP_AND_E);
        rec.accumulated_depreciation = amount(labels::ACCUMULATED_DEPRECIATION);
        rec.revenue = amount(labels::REVENUE);
        rec.cogs = amount(labels::COGS);
        rec.gross_profit = amount(labels::GROSS_PROFIT);
        rec.operating_profit = amount(labels::OPERATING_PROFIT);
        rec.operating_expense = amount(labels::OPERATING_EXPENSE);
        rec.sga_expense = amount(labels::SGA_EXPENSE);
        rec.rd_expense = amount(labels::RD_EXPENSE);
        rec.net_income = amount(labels::NET_INCOME);
        rec.interest_income = amount(labels::INTEREST_INCOME);
        rec.interest_expense = amount(labels::INTEREST_EXPENSE);
        rec.depreciation = amount(labels::DEPRECIATION);
        rec.investing_cf = amount(labels::INVESTING_CF);
        rec.financing_cf = amount(labels::FINANCING_CF);

        rec.report_date = rows
            .iter()
            .filter_map(|r| r.thstrm_dt.as_deref())
            .find_map(parse_term_end);

        // A filing where not a single line item mapped carries no signal;
        // treat it like the provider having nothing for this period.
        let any_field = [
            rec.total_assets,
            rec.total_liabilities,
            rec.total_equity,
            rec.revenue,
            rec.operating_profit,
            rec.net_income,
        ]
        .iter()
        .any(Option::is_some);
        any_field.then_some(rec)
    }
}

/// Extracts the period-end date from a current-term date string
/// (`"2024.01.01 ~ 2024.12.31"` or `"2024.12.31 현재"`).
fn parse_term_end(s: &str) -> Option<NaiveDate> {
    s.split_whitespace()
        .filter_map(|tok| NaiveDate::parse_from_str(tok, "%Y.%m.%d").ok())
        .next_back()
}

#[async_trait]
impl SourceAdapter for DartAdapter {
    fn id(&self) -> SourceId {
        SourceId::Dart
    }

    async fn fetch(&self, req: FetchRequest<'_>) -> Result<AdapterOutcome, AdapterError> {
        if req.region != Region::Kr {
            return Ok(AdapterOutcome::Empty);
        }
        let Some(code) = report_code(req.period_type) else {
            // No such report exists at the regulator.
            return Ok(AdapterOutcome::Empty);
        };
        let Some(key) = self.api_key.as_deref() else {
            return Err(AdapterError::auth_failed(
                SourceId::Dart,
                format!("{} not set", SourceId::Dart.api_key_env()),
            ));
        };
        let Some(corp_code) = self.resolve_corp_code(req.ticker) else {
            return Err(AdapterError::not_found(
                SourceId::Dart,
                format!("no corp_code mapping for {}", req.ticker),
            ));
        };

        let mut url = self
            .base
            .join("fnlttSinglAcnt.json")
            .map_err(|e| AdapterError::malformed(SourceId::Dart, e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("crtfc_key", key)
            .append_pair("corp_code", corp_code)
            .append_pair("bsns_year", &req.fiscal_year.to_string())
            .append_pair("reprt_code", code);

        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AdapterError::from_http(SourceId::Dart, &e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(
                SourceId::Dart,
                status.as_u16(),
                &url,
            ));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| AdapterError::from_http(SourceId::Dart, &e))?;

        let envelope: FnlttEnvelope = serde_json::from_str(&body).map_err(|e| {
            AdapterError::malformed(SourceId::Dart, format!("{e}; body: {}", excerpt(&body)))
        })?;

        match envelope.status.as_str() {
            "000" => {}
            // No data for this company/period (includes everything before
            // the electronic-filing floor).
            "013" => return Ok(AdapterOutcome::Empty),
            "020" => {
                return Err(AdapterError::throttled(
                    SourceId::Dart,
                    envelope.message.unwrap_or_else(|| "usage limit".into()),
                ));
            }
            "010" | "011" | "012" => {
                return Err(AdapterError::auth_failed(
                    SourceId::Dart,
                    envelope.message.unwrap_or_else(|| "key rejected".into()),
                ));
            }
            "800" => {
                return Err(AdapterError::transient(
                    SourceId::Dart,
                    envelope.message.unwrap_or_else(|| "maintenance".into()),
                ));
            }
            other => {
                return Err(AdapterError::malformed(
                    SourceId::Dart,
                    format!(
                        "unexpected status {other}: {}",
                        envelope.message.unwrap_or_default()
                    ),
                ));
            }
        }

        match self.build_record(req, code, &envelope.list) {
            Some(rec) => Ok(AdapterOutcome::Record(Box::new(rec))),
            None => {
                tracing::debug!(ticker = req.ticker, year = req.fiscal_year, "filing had no mappable line items");
                Ok(AdapterOutcome::Empty)
            }
        }
    }
}

/// First chunk of an unparseable body, for the logs.
fn excerpt(body: &str) -> String {
    let mut end = body.len().min(120);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/* ----------------------- Builder ----------------------- */

/// Builder for [`DartAdapter`].
#[derive(Default)]
pub struct DartAdapterBuilder {
    base: Option<Url>,
    api_key: Option<String>,
    corp_codes: HashMap<String, String>,
    timeout: Option<Duration>,
}

impl DartAdapterBuilder {
    /// Override the API base (e.g., for a mock server in tests).
    #[must_use]
    pub fn base_url(mut self, url: Url) -> Self {
        self.base = Some(url);
        self
    }

    /// Set the API credential. When absent the first fetch fails with
    /// `AuthFailed`, which poisons the source for the run.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Read the credential from the provider's environment variable.
    #[must_use]
    pub fn api_key_from_env(mut self) -> Self {
        self.api_key = std::env::var(SourceId::Dart.api_key_env()).ok();
        self
    }

    /// Inject the ticker → corp_code mapping.
    #[must_use]
    pub fn corp_codes(mut self, map: HashMap<String, String>) -> Self {
        self.corp_codes = map;
        self
    }

    /// Add one ticker → corp_code pair.
    #[must_use]
    pub fn corp_code(mut self, ticker: impl Into<String>, corp: impl Into<String>) -> Self {
        self.corp_codes.insert(ticker.into(), corp.into());
        self
    }

    /// Per-request transport timeout. Default: 30s.
    #[must_use]
    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }

    pub fn build(self) -> Result<DartAdapter, FillError> {
        let base = match self.base {
            Some(u) => u,
            None => Url::parse(DEFAULT_BASE)?,
        };
        let http = Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;
        Ok(DartAdapter {
            http,
            base,
            api_key: self.api_key,
            corp_codes: self.corp_codes,
        })
    }
}
