use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::FillError;

/// Market region of a listed ticker.
///
/// Symbol formatting differs per region: KR uses 6-digit numeric codes,
/// US/VN use alphabetic symbols, and CN/HK/JP use numeric codes with a
/// venue suffix (`600519.SS`, `0700.HK`, `7203.T`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    /// South Korea (KRX).
    Kr,
    /// United States.
    Us,
    /// Japan.
    Jp,
    /// Mainland China.
    Cn,
    /// Hong Kong.
    Hk,
    /// Vietnam.
    Vn,
}

impl Region {
    /// Canonical two-letter uppercase code, as stored in the fundamentals table.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Kr => "KR",
            Self::Us => "US",
            Self::Jp => "JP",
            Self::Cn => "CN",
            Self::Hk => "HK",
            Self::Vn => "VN",
        }
    }

    /// Parses a region code (case-insensitive).
    pub fn parse(s: &str) -> Result<Self, FillError> {
        match s.to_ascii_uppercase().as_str() {
            "KR" => Ok(Self::Kr),
            "US" => Ok(Self::Us),
            "JP" => Ok(Self::Jp),
            "CN" => Ok(Self::Cn),
            "HK" => Ok(Self::Hk),
            "VN" => Ok(Self::Vn),
            other => Err(FillError::InvalidParams(format!(
                "unknown region code: {other}"
            ))),
        }
    }

    /// Checks that a ticker symbol is plausibly formatted for this region.
    ///
    /// This is a cheap structural check used to reject malformed universe
    /// entries before any network call, not an existence lookup.
    #[must_use]
    pub fn symbol_is_valid(self, symbol: &str) -> bool {
        if symbol.is_empty() {
            return false;
        }
        match self {
            Self::Kr => symbol.len() == 6 && symbol.bytes().all(|b| b.is_ascii_digit()),
            Self::Us | Self::Vn => symbol
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b == b'.' || b == b'-'),
            Self::Cn | Self::Hk | Self::Jp => {
                // numeric body with a venue suffix, e.g. 0700.HK / 7203.T
                let Some((body, venue)) = symbol.split_once('.') else {
                    return false;
                };
                !body.is_empty()
                    && body.bytes().all(|b| b.is_ascii_digit())
                    && !venue.is_empty()
                    && venue.bytes().all(|b| b.is_ascii_uppercase())
            }
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Reporting period covered by a fundamentals row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodType {
    /// Full fiscal year statement.
    Annual,
    /// First-half statement.
    SemiAnnual,
    /// First-quarter statement.
    Q1,
    /// Second-quarter statement.
    Q2,
    /// Third-quarter statement.
    Q3,
    /// Point-in-time ratio snapshot computed from price; carries no
    /// fiscal year and is never planned by the backfill itself.
    Daily,
}

impl PeriodType {
    /// Canonical store representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Annual => "ANNUAL",
            Self::SemiAnnual => "SEMI_ANNUAL",
            Self::Q1 => "Q1",
            Self::Q2 => "Q2",
            Self::Q3 => "Q3",
            Self::Daily => "DAILY",
        }
    }

    /// Parses the canonical store representation.
    pub fn parse(s: &str) -> Result<Self, FillError> {
        match s {
            "ANNUAL" => Ok(Self::Annual),
            "SEMI_ANNUAL" => Ok(Self::SemiAnnual),
            "Q1" => Ok(Self::Q1),
            "Q2" => Ok(Self::Q2),
            "Q3" => Ok(Self::Q3),
            "DAILY" => Ok(Self::Daily),
            other => Err(FillError::InvalidParams(format!(
                "unknown period type: {other}"
            ))),
        }
    }

    /// Whether rows of this period type carry a fiscal year.
    #[must_use]
    pub const fn wants_fiscal_year(self) -> bool {
        !matches!(self, Self::Daily)
    }
}

impl std::fmt::Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The dedup key of the fundamentals store: at most one row may exist
/// per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub ticker: String,
    pub region: Region,
    pub fiscal_year: Option<i32>,
    pub period_type: PeriodType,
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.fiscal_year {
            Some(y) => write!(f, "{}/{}/{}/{}", self.ticker, self.region, y, self.period_type),
            None => write!(f, "{}/{}/-/{}", self.ticker, self.region, self.period_type),
        }
    }
}

/// A ticker-registry entry. Populated by an external registry process;
/// this engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub region: Region,
    pub name: Option<String>,
    pub sector_code: Option<String>,
    pub active: bool,
    pub listed_on: Option<NaiveDate>,
    pub delisted_on: Option<NaiveDate>,
    pub market_cap: Option<i64>,
}

/// One canonical fundamentals row.
///
/// Statement fields are integer-valued in the issuer's reporting currency
/// base units; ratios are plain floats. Everything beyond the identity is
/// optional: adapters fill what the provider exposes and leave the rest null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundamentalRecord {
    pub ticker: String,
    pub region: Option<Region>,
    pub fiscal_year: Option<i32>,
    pub period_type: Option<PeriodType>,
    /// Calendar date the statement references (period end).
    pub report_date: Option<NaiveDate>,

    /* --- balance sheet --- */
    pub total_assets: Option<i64>,
    pub total_liabilities: Option<i64>,
    pub total_equity: Option<i64>,
    pub current_assets: Option<i64>,
    pub current_liabilities: Option<i64>,
    pub inventory: Option<i64>,
    pub accounts_receivable: Option<i64>,
    pub pp_and_e: Option<i64>,
    pub accumulated_depreciation: Option<i64>,

    /* --- income statement --- */
    pub revenue: Option<i64>,
    pub cogs: Option<i64>,
    pub gross_profit: Option<i64>,
    pub operating_profit: Option<i64>,
    pub operating_expense: Option<i64>,
    pub sga_expense: Option<i64>,
    pub rd_expense: Option<i64>,
    pub net_income: Option<i64>,
    pub interest_income: Option<i64>,
    pub interest_expense: Option<i64>,
    pub depreciation: Option<i64>,
    pub ebitda: Option<i64>,

    /* --- cash flow --- */
    pub investing_cf: Option<i64>,
    pub financing_cf: Option<i64>,

    /* --- per-share / ratios --- */
    pub shares_outstanding: Option<i64>,
    pub dividend_per_share: Option<f64>,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub psr: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub debt_ratio: Option<f64>,
    pub ebitda_margin: Option<f64>,
    pub nim: Option<f64>,

    /* --- price snapshot at report_date --- */
    pub close_price: Option<f64>,
    pub market_cap: Option<i64>,

    /// Provider provenance tag, e.g. `DART-2024-11011` or `YFINANCE`.
    pub data_source: String,
}

/// Why a record was rejected before reaching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Ticker symbol or region missing from the identity.
    IdentityMissing,
    /// `data_source` is empty.
    DataSourceMissing,
    /// `fiscal_year` must be present exactly when the period is a
    /// statement period (everything but DAILY).
    PeriodYearInconsistent,
    /// per/pbr/psr must be finite or null.
    NonFiniteRatio,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IdentityMissing => "identity missing",
            Self::DataSourceMissing => "data_source missing",
            Self::PeriodYearInconsistent => "fiscal_year inconsistent with period_type",
            Self::NonFiniteRatio => "non-finite valuation ratio",
        };
        f.write_str(s)
    }
}

/// Relative tolerance for the advisory gross-profit check.
const GROSS_PROFIT_TOLERANCE: f64 = 0.005;

impl FundamentalRecord {
    /// Builds an empty record carrying only its identity and provenance.
    #[must_use]
    pub fn bare(
        ticker: impl Into<String>,
        region: Region,
        fiscal_year: Option<i32>,
        period_type: PeriodType,
        data_source: impl Into<String>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            region: Some(region),
            fiscal_year,
            period_type: Some(period_type),
            data_source: data_source.into(),
            ..Self::default()
        }
    }

    /// The dedup key of this record, if the identity fields are present.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        let region = self.region?;
        let period_type = self.period_type?;
        if self.ticker.is_empty() {
            return None;
        }
        Some(Identity {
            ticker: self.ticker.clone(),
            region,
            fiscal_year: self.fiscal_year,
            period_type,
        })
    }

    /// Enforces the blocking invariants. Returns the first violation found.
    pub fn validate(&self) -> Result<(), RejectReason> {
        if self.ticker.is_empty() || self.region.is_none() || self.period_type.is_none() {
            return Err(RejectReason::IdentityMissing);
        }
        if self.data_source.is_empty() {
            return Err(RejectReason::DataSourceMissing);
        }
        let wants_year = self
            .period_type
            .is_some_and(PeriodType::wants_fiscal_year);
        if wants_year != self.fiscal_year.is_some() {
            return Err(RejectReason::PeriodYearInconsistent);
        }
        for ratio in [self.per, self.pbr, self.psr] {
            if ratio.is_some_and(|v| !v.is_finite()) {
                return Err(RejectReason::NonFiniteRatio);
            }
        }
        Ok(())
    }

    /// Fills `gross_profit` from `revenue - cogs` when it was not supplied.
    /// A supplied value always wins; when both exist and disagree beyond
    /// tolerance a warning is logged but the write proceeds.
    pub fn normalize(&mut self) {
        match (self.gross_profit, self.revenue, self.cogs) {
            (None, Some(rev), Some(cogs)) => {
                self.gross_profit = Some(rev - cogs);
            }
            (Some(gp), Some(rev), Some(cogs)) => {
                let derived = rev - cogs;
                let tolerance = ((rev.abs() as f64) * GROSS_PROFIT_TOLERANCE).max(1.0);
                if ((gp - derived).abs() as f64) > tolerance {
                    tracing::warn!(
                        ticker = %self.ticker,
                        supplied = gp,
                        derived,
                        "gross_profit disagrees with revenue - cogs"
                    );
                }
            }
            _ => {}
        }
    }
}
