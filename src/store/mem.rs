//! In-memory store used by tests and `--dry-run`.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{Identity, PeriodType, Region, Ticker};
use crate::store::{FundamentalsStore, StoreError, StoredRecord, UniverseFilter};

/// A `HashMap`-backed store with the same unique-key semantics as the
/// production table.
#[derive(Default)]
pub struct MemStore {
    rows: RwLock<HashMap<Identity, StoredRecord>>,
    registry: RwLock<Vec<Ticker>>,
}

impl MemStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the ticker registry.
    pub async fn seed_tickers(&self, tickers: impl IntoIterator<Item = Ticker>) {
        self.registry.write().await.extend(tickers);
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Snapshot of every stored row, for assertions.
    pub async fn dump(&self) -> Vec<StoredRecord> {
        let rows = self.rows.read().await;
        let mut all: Vec<StoredRecord> = rows.values().cloned().collect();
        all.sort_by(|a, b| {
            (&a.record.ticker, a.record.fiscal_year)
                .cmp(&(&b.record.ticker, b.record.fiscal_year))
        });
        all
    }
}

#[async_trait]
impl FundamentalsStore for MemStore {
    async fn get(&self, id: &Identity) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn put(&self, row: StoredRecord) -> Result<(), StoreError> {
        let Some(id) = row.record.identity() else {
            return Err(StoreError::SchemaMismatch(
                "row without identity".to_string(),
            ));
        };
        self.rows.write().await.insert(id, row);
        Ok(())
    }

    async fn put_batch(&self, batch: Vec<StoredRecord>) -> Result<(), StoreError> {
        // single write-lock hold makes the batch atomic for readers
        let mut rows = self.rows.write().await;
        let mut staged = Vec::with_capacity(batch.len());
        for row in batch {
            let Some(id) = row.record.identity() else {
                return Err(StoreError::SchemaMismatch(
                    "row without identity".to_string(),
                ));
            };
            staged.push((id, row));
        }
        for (id, row) in staged {
            rows.insert(id, row);
        }
        Ok(())
    }

    async fn existing_identities(
        &self,
        region: Region,
        years: RangeInclusive<i32>,
        period_types: &[PeriodType],
    ) -> Result<HashMap<Identity, String>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|(id, _)| {
                id.region == region
                    && period_types.contains(&id.period_type)
                    && id.fiscal_year.is_some_and(|y| years.contains(&y))
            })
            .map(|(id, row)| (id.clone(), row.record.data_source.clone()))
            .collect())
    }

    async fn tickers(&self, filter: &UniverseFilter) -> Result<Vec<Ticker>, StoreError> {
        let registry = self.registry.read().await;
        let mut picked: Vec<Ticker> = registry
            .iter()
            .filter(|t| t.region == filter.region)
            .filter(|t| !filter.active_only || t.active)
            .filter(|t| {
                filter
                    .symbols
                    .as_ref()
                    .is_none_or(|list| list.iter().any(|s| s == &t.symbol))
            })
            .cloned()
            .collect();
        if let Some(top) = filter.top_by_market_cap {
            picked.sort_by_key(|t| std::cmp::Reverse(t.market_cap.unwrap_or(0)));
            picked.truncate(top);
        }
        Ok(picked)
    }
}
