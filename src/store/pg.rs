//! Postgres-backed fundamentals store.
//!
//! Queries are runtime-bound so the crate builds without a live database.
//! Writes are single `INSERT .. ON CONFLICT` statements against the
//! identity key; the row image arrives pre-merged from the upsert engine,
//! so the conflict action is a plain full-row update.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};

use crate::core::{FundamentalRecord, Identity, PeriodType, Region, Ticker};
use crate::store::{FundamentalsStore, StoreError, StoredRecord, UniverseFilter};

const SELECT_COLUMNS: &str = "ticker, region, fiscal_year, period_type, report_date, \
     total_assets, total_liabilities, total_equity, current_assets, current_liabilities, \
     inventory, accounts_receivable, pp_and_e, accumulated_depreciation, \
     revenue, cogs, gross_profit, operating_profit, operating_expense, sga_expense, \
     rd_expense, net_income, interest_income, interest_expense, depreciation, ebitda, \
     investing_cf, financing_cf, shares_outstanding, dividend_per_share, \
     per, pbr, psr, roe, roa, debt_ratio, ebitda_margin, nim, \
     close_price, market_cap, data_source, created_at, updated_at";

const UPSERT_SQL: &str = r#"
INSERT INTO fundamentals (
    ticker, region, fiscal_year, period_type, report_date,
    total_assets, total_liabilities, total_equity, current_assets, current_liabilities,
    inventory, accounts_receivable, pp_and_e, accumulated_depreciation,
    revenue, cogs, gross_profit, operating_profit, operating_expense, sga_expense,
    rd_expense, net_income, interest_income, interest_expense, depreciation, ebitda,
    investing_cf, financing_cf, shares_outstanding, dividend_per_share,
    per, pbr, psr, roe, roa, debt_ratio, ebitda_margin, nim,
    close_price, market_cap, data_source, created_at, updated_at
)
VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
    $21, $22, $23, $24, $25, $26, $27, $28, $29, $30,
    $31, $32, $33, $34, $35, $36, $37, $38, $39, $40,
    $41, $42, $43
)
ON CONFLICT (ticker, region, fiscal_year, period_type) DO UPDATE SET
    report_date = EXCLUDED.report_date,
    total_assets = EXCLUDED.total_assets,
    total_liabilities = EXCLUDED.total_liabilities,
    total_equity = EXCLUDED.total_equity,
    current_assets = EXCLUDED.current_assets,
    current_liabilities = EXCLUDED.current_liabilities,
    inventory = EXCLUDED.inventory,
    accounts_receivable = EXCLUDED.accounts_receivable,
    pp_and_e = EXCLUDED.pp_and_e,
    accumulated_depreciation = EXCLUDED.accumulated_depreciation,
    revenue = EXCLUDED.revenue,
    cogs = EXCLUDED.cogs,
    gross_profit = EXCLUDED.gross_profit,
    operating_profit = EXCLUDED.operating_profit,
    operating_expense = EXCLUDED.operating_expense,
    sga_expense = EXCLUDED.sga_expense,
    rd_expense = EXCLUDED.rd_expense,
    net_income = EXCLUDED.net_income,
    interest_income = EXCLUDED.interest_income,
    interest_expense = EXCLUDED.interest_expense,
    depreciation = EXCLUDED.depreciation,
    ebitda = EXCLUDED.ebitda,
    investing_cf = EXCLUDED.investing_cf,
    financing_cf = EXCLUDED.financing_cf,
    shares_outstanding = EXCLUDED.shares_outstanding,
    dividend_per_share = EXCLUDED.dividend_per_share,
    per = EXCLUDED.per,
    pbr = EXCLUDED.pbr,
    psr = EXCLUDED.psr,
    roe = EXCLUDED.roe,
    roa = EXCLUDED.roa,
    debt_ratio = EXCLUDED.debt_ratio,
    ebitda_margin = EXCLUDED.ebitda_margin,
    nim = EXCLUDED.nim,
    close_price = EXCLUDED.close_price,
    market_cap = EXCLUDED.market_cap,
    data_source = EXCLUDED.data_source,
    updated_at = EXCLUDED.updated_at
"#;

/// Postgres store over a fixed-size connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the store URI (normally `STORE_URL`).
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(classify)?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bind_row<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    row: &StoredRecord,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    let r = &row.record;
    q.bind(r.ticker.clone())
        .bind(r.region.map(Region::code))
        .bind(r.fiscal_year)
        .bind(r.period_type.map(PeriodType::as_str))
        .bind(r.report_date)
        .bind(r.total_assets)
        .bind(r.total_liabilities)
        .bind(r.total_equity)
        .bind(r.current_assets)
        .bind(r.current_liabilities)
        .bind(r.inventory)
        .bind(r.accounts_receivable)
        .bind(r.pp_and_e)
        .bind(r.accumulated_depreciation)
        .bind(r.revenue)
        .bind(r.cogs)
        .bind(r.gross_profit)
        .bind(r.operating_profit)
        .bind(r.operating_expense)
        .bind(r.sga_expense)
        .bind(r.rd_expense)
        .bind(r.net_income)
        .bind(r.interest_income)
        .bind(r.interest_expense)
        .bind(r.depreciation)
        .bind(r.ebitda)
        .bind(r.investing_cf)
        .bind(r.financing_cf)
        .bind(r.shares_outstanding)
        .bind(r.dividend_per_share)
        .bind(r.per)
        .bind(r.pbr)
        .bind(r.psr)
        .bind(r.roe)
        .bind(r.roa)
        .bind(r.debt_ratio)
        .bind(r.ebitda_margin)
        .bind(r.nim)
        .bind(r.close_price)
        .bind(r.market_cap)
        .bind(r.data_source.clone())
        .bind(row.created_at)
        .bind(row.updated_at)
}

fn row_to_stored(row: &PgRow) -> Result<StoredRecord, StoreError> {
    let get_str = |col: &str| -> Result<String, StoreError> {
        row.try_get::<String, _>(col).map_err(classify)
    };
    let region = Region::parse(&get_str("region")?)
        .map_err(|e| StoreError::SchemaMismatch(e.to_string()))?;
    let period_type = PeriodType::parse(&get_str("period_type")?)
        .map_err(|e| StoreError::SchemaMismatch(e.to_string()))?;

    macro_rules! opt {
        ($ty:ty, $col:literal) => {
            row.try_get::<Option<$ty>, _>($col).map_err(classify)?
        };
    }

    let record = FundamentalRecord {
        ticker: get_str("ticker")?,
        region: Some(region),
        fiscal_year: opt!(i32, "fiscal_year"),
        period_type: Some(period_type),
        report_date: opt!(NaiveDate, "report_date"),
        total_assets: opt!(i64, "total_assets"),
        total_liabilities: opt!(i64, "total_liabilities"),
        total_equity: opt!(i64, "total_equity"),
        current_assets: opt!(i64, "current_assets"),
        current_liabilities: opt!(i64, "current_liabilities"),
        inventory: opt!(i64, "inventory"),
        accounts_receivable: opt!(i64, "accounts_receivable"),
        pp_and_e: opt!(i64, "pp_and_e"),
        accumulated_depreciation: opt!(i64, "accumulated_depreciation"),
        revenue: opt!(i64, "revenue"),
        cogs: opt!(i64, "cogs"),
        gross_profit: opt!(i64, "gross_profit"),
        operating_profit: opt!(i64, "operating_profit"),
        operating_expense: opt!(i64, "operating_expense"),
        sga_expense: opt!(i64, "sga_expense"),
        rd_expense: opt!(i64, "rd_expense"),
        net_income: opt!(i64, "net_income"),
        interest_income: opt!(i64, "interest_income"),
        interest_expense: opt!(i64, "interest_expense"),
        depreciation: opt!(i64, "depreciation"),
        ebitda: opt!(i64, "ebitda"),
        investing_cf: opt!(i64, "investing_cf"),
        financing_cf: opt!(i64, "financing_cf"),
        shares_outstanding: opt!(i64, "shares_outstanding"),
        dividend_per_share: opt!(f64, "dividend_per_share"),
        per: opt!(f64, "per"),
        pbr: opt!(f64, "pbr"),
        psr: opt!(f64, "psr"),
        roe: opt!(f64, "roe"),
        roa: opt!(f64, "roa"),
        debt_ratio: opt!(f64, "debt_ratio"),
        ebitda_margin: opt!(f64, "ebitda_margin"),
        nim: opt!(f64, "nim"),
        close_price: opt!(f64, "close_price"),
        market_cap: opt!(i64, "market_cap"),
        data_source: get_str("data_source")?,
    };
    Ok(StoredRecord {
        record,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(classify)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(classify)?,
    })
}

/// Splits driver errors into retryable vs fatal per the orchestrator's
/// failure policy.
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            if code == "23505" {
                StoreError::UniqueViolation(db.message().to_string())
            } else if code.starts_with("42") {
                // undefined table/column, datatype mismatch
                StoreError::SchemaMismatch(db.message().to_string())
            } else {
                StoreError::Transient(db.message().to_string())
            }
        }
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_) => StoreError::SchemaMismatch(err.to_string()),
        _ => StoreError::Transient(err.to_string()),
    }
}

#[async_trait]
impl FundamentalsStore for PgStore {
    async fn get(&self, id: &Identity) -> Result<Option<StoredRecord>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM fundamentals \
             WHERE ticker = $1 AND region = $2 AND period_type = $3 \
               AND fiscal_year IS NOT DISTINCT FROM $4"
        );
        let row = sqlx::query(&sql)
            .bind(&id.ticker)
            .bind(id.region.code())
            .bind(id.period_type.as_str())
            .bind(id.fiscal_year)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        row.as_ref().map(row_to_stored).transpose()
    }

    async fn put(&self, row: StoredRecord) -> Result<(), StoreError> {
        bind_row(sqlx::query(UPSERT_SQL), &row)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn put_batch(&self, rows: Vec<StoredRecord>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for row in &rows {
            bind_row(sqlx::query(UPSERT_SQL), row)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn existing_identities(
        &self,
        region: Region,
        years: RangeInclusive<i32>,
        period_types: &[PeriodType],
    ) -> Result<HashMap<Identity, String>, StoreError> {
        let types: Vec<String> = period_types.iter().map(|p| p.as_str().to_string()).collect();
        let rows = sqlx::query(
            "SELECT ticker, fiscal_year, period_type, data_source FROM fundamentals \
             WHERE region = $1 AND fiscal_year BETWEEN $2 AND $3 AND period_type = ANY($4)",
        )
        .bind(region.code())
        .bind(*years.start())
        .bind(*years.end())
        .bind(&types)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let period_type = PeriodType::parse(&row.try_get::<String, _>("period_type").map_err(classify)?)
                .map_err(|e| StoreError::SchemaMismatch(e.to_string()))?;
            out.insert(
                Identity {
                    ticker: row.try_get("ticker").map_err(classify)?,
                    region,
                    fiscal_year: row.try_get("fiscal_year").map_err(classify)?,
                    period_type,
                },
                row.try_get("data_source").map_err(classify)?,
            );
        }
        Ok(out)
    }

    async fn tickers(&self, filter: &UniverseFilter) -> Result<Vec<Ticker>, StoreError> {
        let mut sql = String::from(
            "SELECT symbol, region, name, sector_code, active, listed_on, delisted_on, market_cap \
             FROM tickers WHERE region = $1",
        );
        if filter.active_only {
            sql.push_str(" AND active");
        }
        if filter.symbols.is_some() {
            sql.push_str(" AND symbol = ANY($2)");
        }
        sql.push_str(" ORDER BY market_cap DESC NULLS LAST, symbol");
        if let Some(top) = filter.top_by_market_cap {
            sql.push_str(&format!(" LIMIT {top}"));
        }

        let mut query = sqlx::query(&sql).bind(filter.region.code());
        if let Some(symbols) = &filter.symbols {
            query = query.bind(symbols);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(classify)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Ticker {
                symbol: row.try_get("symbol").map_err(classify)?,
                region: filter.region,
                name: row.try_get("name").map_err(classify)?,
                sector_code: row.try_get("sector_code").map_err(classify)?,
                active: row.try_get("active").map_err(classify)?,
                listed_on: row.try_get("listed_on").map_err(classify)?,
                delisted_on: row.try_get("delisted_on").map_err(classify)?,
                market_cap: row.try_get("market_cap").map_err(classify)?,
            });
        }
        Ok(out)
    }
}
