use serde::Deserialize;

/* ---------------- Serde mapping (only what we need) ---------------- */

/// Envelope of the single-company full-statement endpoint.
#[derive(Deserialize)]
pub(super) struct FnlttEnvelope {
    pub(super) status: String,
    #[serde(default)]
    pub(super) message: Option<String>,
    #[serde(default)]
    pub(super) list: Vec<FnlttRow>,
}

/// One statement line item. Amounts arrive as comma-grouped strings.
#[derive(Deserialize)]
pub(super) struct FnlttRow {
    /// `CFS` consolidated / `OFS` separate financials.
    #[serde(default)]
    pub(super) fs_div: Option<String>,
    /// Account name as printed in the filing (Korean).
    #[serde(default)]
    pub(super) account_nm: Option<String>,
    /// Current-term amount, e.g. `"1,234,567"`.
    #[serde(default)]
    pub(super) thstrm_amount: Option<String>,
    /// Current-term date, `"2024.01.01 ~ 2024.12.31"` for flows or
    /// `"2024.12.31 현재"` for balances.
    #[serde(default)]
    pub(super) thstrm_dt: Option<String>,
}
