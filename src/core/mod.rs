// src/core/mod.rs
pub mod error;
pub mod model;
pub mod source;

// convenient re-exports so most code can just `use crate::core::FillError`
pub use error::FillError;
pub use model::{FundamentalRecord, Identity, PeriodType, Region, RejectReason, Ticker};
pub use source::{RateSpec, SourceId, default_sources, provenance_rank};
