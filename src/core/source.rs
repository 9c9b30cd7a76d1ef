use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{FillError, Region};

/// A configured data provider.
///
/// Ordering between sources is expressed through [`SourceId::rank`]:
/// regulator filings outrank market-helper snapshots, which outrank the
/// global fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceId {
    /// Korean regulator filing API (full statements, strict rate limit).
    Dart,
    /// Korean exchange market-data helper (ratios only, moderate rate).
    Krx,
    /// Global fallback (partial statements + ratios, lenient rate).
    Yahoo,
}

impl SourceId {
    /// Every known source, in descending provenance rank.
    pub const ALL: [Self; 3] = [Self::Dart, Self::Krx, Self::Yahoo];

    /// Short provider tag used as the `data_source` prefix.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Dart => "DART",
            Self::Krx => "KRX",
            Self::Yahoo => "YFINANCE",
        }
    }

    /// Provenance rank; higher outranks lower on upsert conflicts.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Dart => 3,
            Self::Krx => 2,
            Self::Yahoo => 1,
        }
    }

    /// Environment variable holding this provider's API credential.
    #[must_use]
    pub const fn api_key_env(self) -> &'static str {
        match self {
            Self::Dart => "DART_API_KEY",
            Self::Krx => "KRX_API_KEY",
            Self::Yahoo => "YFINANCE_API_KEY",
        }
    }

    /// Request budget published by the provider.
    #[must_use]
    pub fn default_rate(self) -> RateSpec {
        match self {
            Self::Dart => RateSpec {
                capacity: 1,
                refill_per_sec: 1.0 / 36.0,
                min_interval: Duration::from_secs(36),
            },
            Self::Krx => RateSpec {
                capacity: 1,
                refill_per_sec: 1.0,
                min_interval: Duration::from_secs(1),
            },
            Self::Yahoo => RateSpec {
                capacity: 2,
                refill_per_sec: 2.0,
                min_interval: Duration::from_millis(500),
            },
        }
    }

    /// Parses a provider name as written on the CLI. The Python-era aliases
    /// (`pykrx`, `yfinance`) are accepted for operator muscle memory.
    pub fn parse(s: &str) -> Result<Self, FillError> {
        match s.to_ascii_lowercase().as_str() {
            "dart" => Ok(Self::Dart),
            "krx" | "pykrx" => Ok(Self::Krx),
            "yahoo" | "yfinance" => Ok(Self::Yahoo),
            other => Err(FillError::InvalidParams(format!(
                "unknown source: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::error::Error for SourceId {}

/// Provenance rank carried by a stored `data_source` tag.
///
/// The tag's provider prefix (everything before the first `-`) decides the
/// rank; unrecognized provenance ranks below every known source so it is
/// always safe to overwrite.
#[must_use]
pub fn provenance_rank(data_source: &str) -> u8 {
    let prefix = data_source.split('-').next().unwrap_or_default();
    SourceId::ALL
        .iter()
        .find(|s| s.tag() == prefix)
        .map_or(0, |s| s.rank())
}

/// Default source priority for a region: the Korean regulator and market
/// helper only cover KR listings; everything else goes to the fallback.
#[must_use]
pub fn default_sources(region: Region) -> Vec<SourceId> {
    match region {
        Region::Kr => vec![SourceId::Dart, SourceId::Krx],
        _ => vec![SourceId::Yahoo],
    }
}

/// Token-bucket parameters for one source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSpec {
    /// Burst size. `0` disables the source entirely.
    pub capacity: u32,
    /// Steady-state refill, tokens per second.
    pub refill_per_sec: f64,
    /// Minimum spacing between any two grants, honored even when tokens
    /// have accumulated.
    pub min_interval: Duration,
}

impl RateSpec {
    /// Whether the source may perform requests at all.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.capacity > 0
    }
}
