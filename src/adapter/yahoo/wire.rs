use std::collections::HashMap;

use serde::Deserialize;

use crate::adapter::wire::RawNum;

/* ---------------- Serde mapping (only what we need) ---------------- */

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TimeseriesEnvelope {
    pub(super) timeseries: Option<TimeseriesResult>,
}

#[derive(Deserialize)]
pub(super) struct TimeseriesResult {
    pub(super) result: Option<Vec<TimeseriesData>>,
}

/// One result element carries a single requested type key, flattened into
/// `values` next to `timestamp`/`meta`.
#[derive(Deserialize)]
pub(super) struct TimeseriesData {
    #[allow(dead_code)]
    #[serde(default)]
    pub(super) timestamp: Option<Vec<i64>>,
    #[allow(dead_code)]
    #[serde(default)]
    meta: serde_json::Value,
    #[serde(flatten)]
    pub(super) values: HashMap<String, serde_json::Value>,
}

/// One dated observation inside a type array.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TimeseriesEntry {
    pub(super) as_of_date: Option<String>,
    pub(super) reported_value: Option<RawNum<f64>>,
}
