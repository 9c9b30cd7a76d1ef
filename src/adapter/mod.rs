//! Source adapters: one per provider, all behind the same contract.
//!
//! An adapter turns one `(ticker, fiscal period)` request into at most one
//! canonical [`FundamentalRecord`]. Adapters are stateless across requests
//! and never retry internally; classification of what is retryable is
//! theirs, the retrying itself belongs to the orchestrator.

pub mod dart;
pub mod krx;
mod wire;
pub mod yahoo;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{FundamentalRecord, PeriodType, Region, SourceId};

/// How an adapter failure should be treated by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AdapterErrorKind {
    /// Provider pushed back on request volume; retry after backoff.
    Throttled,
    /// Network-ish failure (timeout, connect, 5xx); retry after backoff.
    Transient,
    /// Provider answered but cannot serve this ticker/period; terminal for
    /// the unit.
    NotFound,
    /// Response arrived but could not be interpreted; terminal for the unit.
    MalformedResponse,
    /// Credential rejected; terminal for the entire source this run.
    AuthFailed,
}

impl AdapterErrorKind {
    /// Whether the orchestrator should reschedule the unit with backoff.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Throttled | Self::Transient)
    }

    /// Whether the failure disqualifies the source for the rest of the run.
    #[must_use]
    pub const fn poisons_source(self) -> bool {
        matches!(self, Self::AuthFailed)
    }
}

/// A classified adapter failure.
#[derive(Debug, Error)]
#[error("{source} adapter {kind:?}: {message}")]
pub struct AdapterError {
    /// Which provider failed.
    pub source: SourceId,
    /// Retry classification.
    pub kind: AdapterErrorKind,
    /// Short human-readable context; for malformed bodies this carries an
    /// excerpt of the offending payload.
    pub message: String,
}

impl AdapterError {
    pub(crate) fn new(source: SourceId, kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn throttled(source: SourceId, message: impl Into<String>) -> Self {
        Self::new(source, AdapterErrorKind::Throttled, message)
    }

    pub(crate) fn transient(source: SourceId, message: impl Into<String>) -> Self {
        Self::new(source, AdapterErrorKind::Transient, message)
    }

    pub(crate) fn not_found(source: SourceId, message: impl Into<String>) -> Self {
        Self::new(source, AdapterErrorKind::NotFound, message)
    }

    pub(crate) fn malformed(source: SourceId, message: impl Into<String>) -> Self {
        Self::new(source, AdapterErrorKind::MalformedResponse, message)
    }

    pub(crate) fn auth_failed(source: SourceId, message: impl Into<String>) -> Self {
        Self::new(source, AdapterErrorKind::AuthFailed, message)
    }

    /// Classifies a transport-level failure.
    pub(crate) fn from_http(source: SourceId, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            AdapterErrorKind::Transient
        } else if err.is_decode() {
            AdapterErrorKind::MalformedResponse
        } else {
            AdapterErrorKind::Transient
        };
        Self::new(source, kind, err.to_string())
    }

    /// Classifies a non-success HTTP status.
    pub(crate) fn from_status(source: SourceId, status: u16, url: &url::Url) -> Self {
        let kind = match status {
            429 => AdapterErrorKind::Throttled,
            401 | 403 => AdapterErrorKind::AuthFailed,
            404 | 410 => AdapterErrorKind::NotFound,
            408 | 500..=599 => AdapterErrorKind::Transient,
            _ => AdapterErrorKind::MalformedResponse,
        };
        Self::new(source, kind, format!("status {status} at {url}"))
    }
}

/// A successful adapter response.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterOutcome {
    /// One canonical record, identity fields populated, statement fields
    /// best-effort.
    Record(Box<FundamentalRecord>),
    /// Provider acknowledged the request but has no data for it. Distinct
    /// from an error: the orchestrator must not retry.
    Empty,
}

/// One fetch request: a single ticker and fiscal period.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub ticker: &'a str,
    pub region: Region,
    pub fiscal_year: i32,
    pub period_type: PeriodType,
}

/// The uniform provider contract.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which provider this adapter speaks to.
    fn id(&self) -> SourceId;

    /// Fetches fundamentals for one ticker and fiscal period.
    ///
    /// Exactly one network round (plus any provider-mandated lookup);
    /// retries and backoff are the orchestrator's concern.
    async fn fetch(&self, req: FetchRequest<'_>) -> Result<AdapterOutcome, AdapterError>;
}
