//! Statement-line labels used by the regulator's filing API.
//!
//! One canonical field maps to several Korean account names because the
//! annual, half-year, and quarterly report formats label the same line item
//! differently. Lookup tries the synonyms in order, annual nomenclature
//! first, and falls back to null when none match.

pub(super) const TOTAL_ASSETS: &[&str] = &["자산총계"];
pub(super) const TOTAL_LIABILITIES: &[&str] = &["부채총계"];
pub(super) const TOTAL_EQUITY: &[&str] = &["자본총계"];
pub(super) const CURRENT_ASSETS: &[&str] = &["유동자산"];
pub(super) const CURRENT_LIABILITIES: &[&str] = &["유동부채"];
pub(super) const INVENTORY: &[&str] = &["재고자산"];
pub(super) const ACCOUNTS_RECEIVABLE: &[&str] = &["매출채권", "매출채권및기타채권"];
pub(super) const PP_AND_E: &[&str] = &["유형자산"];
pub(super) const ACCUMULATED_DEPRECIATION: &[&str] = &["감가상각누계액"];

pub(super) const REVENUE: &[&str] = &["매출액", "수익(매출액)", "영업수익"];
pub(super) const COGS: &[&str] = &["매출원가"];
pub(super) const GROSS_PROFIT: &[&str] = &["매출총이익", "매출총이익(손실)"];
pub(super) const OPERATING_PROFIT: &[&str] = &["영업이익", "영업이익(손실)"];
pub(super) const OPERATING_EXPENSE: &[&str] = &["영업비용"];
pub(super) const SGA_EXPENSE: &[&str] = &["판매비와관리비", "판매비와 관리비"];
pub(super) const RD_EXPENSE: &[&str] = &["연구개발비", "경상연구개발비"];
// annual filings say 당기순이익, interim filings switch to 반기/분기순이익
pub(super) const NET_INCOME: &[&str] = &[
    "당기순이익",
    "당기순이익(손실)",
    "연결당기순이익",
    "반기순이익",
    "반기순이익(손실)",
    "분기순이익",
    "분기순이익(손실)",
];
pub(super) const INTEREST_INCOME: &[&str] = &["이자수익"];
pub(super) const INTEREST_EXPENSE: &[&str] = &["이자비용"];
pub(super) const DEPRECIATION: &[&str] = &["감가상각비"];

pub(super) const INVESTING_CF: &[&str] = &["투자활동현금흐름", "투자활동으로 인한 현금흐름"];
pub(super) const FINANCING_CF: &[&str] = &["재무활동현금흐름", "재무활동으로 인한 현금흐름"];
