//! Idempotent writes with provenance-ranked conflict resolution.
//!
//! The conflict fold itself is a pure function over records so the merge
//! laws hold by unit test rather than by database behavior. The engine
//! wraps it with validation, derived-field enrichment, and the store
//! round-trip.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::core::{FundamentalRecord, Identity, RejectReason, provenance_rank};
use crate::store::{FundamentalsStore, StoreError, StoredRecord};

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpsertOutcome {
    /// No row existed for the identity; one was created.
    Inserted,
    /// An existing row changed in at least one field.
    Updated,
    /// The merged image equals the stored row; nothing written,
    /// `updated_at` untouched.
    NoChange,
    /// The record failed validation and never reached the store.
    Rejected(RejectReason),
}

/// Outcome of the pure conflict fold.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    /// No existing row: store the incoming record as-is.
    Insert(FundamentalRecord),
    /// Existing row changes to this merged image.
    Update(FundamentalRecord),
    /// Merged image equals the stored row.
    NoChange,
}

/// Applies every non-identity field of `src` onto `dst`.
/// With `fill_only`, a field is copied only where `dst` holds null; the
/// stored provenance tag also stays untouched in that mode (a lower-ranked
/// source must never claim the row).
fn apply_fields(dst: &mut FundamentalRecord, src: &FundamentalRecord, fill_only: bool) {
    macro_rules! apply {
        ($($f:ident),+ $(,)?) => {
            $(
                if fill_only {
                    if dst.$f.is_none() {
                        dst.$f = src.$f;
                    }
                } else if src.$f.is_some() {
                    dst.$f = src.$f;
                }
            )+
        };
    }
    apply!(
        report_date,
        total_assets,
        total_liabilities,
        total_equity,
        current_assets,
        current_liabilities,
        inventory,
        accounts_receivable,
        pp_and_e,
        accumulated_depreciation,
        revenue,
        cogs,
        gross_profit,
        operating_profit,
        operating_expense,
        sga_expense,
        rd_expense,
        net_income,
        interest_income,
        interest_expense,
        depreciation,
        ebitda,
        investing_cf,
        financing_cf,
        shares_outstanding,
        dividend_per_share,
        per,
        pbr,
        psr,
        roe,
        roa,
        debt_ratio,
        ebitda_margin,
        nim,
        close_price,
        market_cap,
    );
    if !fill_only {
        dst.data_source = src.data_source.clone();
    }
}

/// The conflict-resolution fold for one identity.
///
/// - incoming outranks stored: full replace, nulls included;
/// - equal rank: field-level merge, incoming non-null wins;
/// - incoming ranks below stored: non-null fields land only on stored nulls.
///
/// Folding any write sequence through this function is deterministic in the
/// completion order, and the provenance rank of a row never decreases.
#[must_use]
pub fn merge(existing: Option<&FundamentalRecord>, incoming: &FundamentalRecord) -> MergeDecision {
    let Some(current) = existing else {
        return MergeDecision::Insert(incoming.clone());
    };

    let incoming_rank = provenance_rank(&incoming.data_source);
    let stored_rank = provenance_rank(&current.data_source);

    let merged = if incoming_rank > stored_rank {
        incoming.clone()
    } else {
        let mut merged = current.clone();
        apply_fields(&mut merged, incoming, incoming_rank < stored_rank);
        merged
    };

    if merged == *current {
        MergeDecision::NoChange
    } else {
        MergeDecision::Update(merged)
    }
}

/// Applies canonical records to a store idempotently.
pub struct UpsertEngine {
    store: Arc<dyn FundamentalsStore>,
}

impl UpsertEngine {
    /// Wraps a store.
    pub fn new(store: Arc<dyn FundamentalsStore>) -> Self {
        Self { store }
    }

    /// Validates, enriches, merges and writes one record.
    ///
    /// Validation failures return `Rejected` without touching the store;
    /// store failures bubble up classified as retryable or fatal.
    pub async fn upsert(&self, record: FundamentalRecord) -> Result<UpsertOutcome, StoreError> {
        let mut record = record;
        if let Err(reason) = record.validate() {
            return Ok(UpsertOutcome::Rejected(reason));
        }
        record.normalize();
        let Some(id) = record.identity() else {
            return Ok(UpsertOutcome::Rejected(RejectReason::IdentityMissing));
        };

        let existing = self.store.get(&id).await?;
        self.decide_and_write(id, existing, record).await
    }

    /// Upserts a batch inside one store transaction; any failure leaves the
    /// store untouched. Records for the same identity fold in order.
    pub async fn upsert_batch(
        &self,
        records: Vec<FundamentalRecord>,
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        let mut outcomes = Vec::with_capacity(records.len());
        // overlay of rows merged so far, so same-identity records in one
        // batch see each other before the transaction lands
        let mut overlay: HashMap<Identity, StoredRecord> = HashMap::new();
        let mut writes: Vec<StoredRecord> = Vec::new();

        for mut record in records {
            if let Err(reason) = record.validate() {
                outcomes.push(UpsertOutcome::Rejected(reason));
                continue;
            }
            record.normalize();
            let Some(id) = record.identity() else {
                outcomes.push(UpsertOutcome::Rejected(RejectReason::IdentityMissing));
                continue;
            };

            let existing = match overlay.get(&id) {
                Some(row) => Some(row.clone()),
                None => self.store.get(&id).await?,
            };
            let now = Utc::now();
            match merge(existing.as_ref().map(|s| &s.record), &record) {
                MergeDecision::NoChange => outcomes.push(UpsertOutcome::NoChange),
                MergeDecision::Insert(merged) => {
                    let row = StoredRecord {
                        record: merged,
                        created_at: now,
                        updated_at: now,
                    };
                    overlay.insert(id, row.clone());
                    writes.push(row);
                    outcomes.push(UpsertOutcome::Inserted);
                }
                MergeDecision::Update(merged) => {
                    let created_at = existing.map_or(now, |e| e.created_at);
                    let row = StoredRecord {
                        record: merged,
                        created_at,
                        updated_at: now,
                    };
                    overlay.insert(id, row.clone());
                    writes.push(row);
                    outcomes.push(UpsertOutcome::Updated);
                }
            }
        }

        if !writes.is_empty() {
            self.store.put_batch(writes).await?;
        }
        Ok(outcomes)
    }

    async fn decide_and_write(
        &self,
        _id: Identity,
        existing: Option<StoredRecord>,
        record: FundamentalRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let now = Utc::now();
        match merge(existing.as_ref().map(|s| &s.record), &record) {
            MergeDecision::NoChange => Ok(UpsertOutcome::NoChange),
            MergeDecision::Insert(merged) => {
                self.store
                    .put(StoredRecord {
                        record: merged,
                        created_at: now,
                        updated_at: now,
                    })
                    .await?;
                Ok(UpsertOutcome::Inserted)
            }
            MergeDecision::Update(merged) => {
                let created_at = existing.map_or(now, |e| e.created_at);
                self.store
                    .put(StoredRecord {
                        record: merged,
                        created_at,
                        updated_at: now,
                    })
                    .await?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }
}
