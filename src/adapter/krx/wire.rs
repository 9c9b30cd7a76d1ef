use std::collections::HashMap;

use serde::Deserialize;

/* ---------------- Serde mapping (only what we need) ---------------- */

/// Whole-market valuation snapshot for one trading day. Rows come back as
/// flat string maps whose column ids vary across endpoint generations, so
/// the row stays generic and the adapter resolves columns by synonym.
#[derive(Deserialize)]
pub(super) struct MarketSnapshot {
    #[serde(default, alias = "OutBlock_1", alias = "block1")]
    pub(super) output: Vec<HashMap<String, serde_json::Value>>,
}
