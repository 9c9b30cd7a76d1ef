//! Parsing helpers shared by the adapter wire modules.

use serde::Deserialize;

/// Yahoo-style numeric envelope: `{"raw": 123.0, "fmt": "123"}`.
#[derive(Deserialize, Clone, Copy)]
pub(crate) struct RawNum<T> {
    pub(crate) raw: Option<T>,
}

pub(crate) fn from_raw<T>(n: Option<RawNum<T>>) -> Option<T> {
    n.and_then(|x| x.raw)
}

/// Parses a human-grouped integer amount (`"1,234,567"`, `"-12"`, `"-"`).
/// Empty and dash placeholders map to `None`; anything else non-numeric is
/// a parse failure surfaced as `None` so a single odd line item does not
/// sink the whole statement.
pub(crate) fn parse_grouped_i64(s: &str) -> Option<i64> {
    let cleaned: String = s.chars().filter(|c| *c != ',' && *c != ' ').collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse::<i64>().ok()
}

/// Parses a grouped decimal (`"1,234.56"`).
pub(crate) fn parse_grouped_f64(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| *c != ',' && *c != ' ').collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
