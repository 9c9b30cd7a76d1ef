//! Per-source request budgets.
//!
//! Each source gets one token-bucket lane. `acquire` suspends the caller
//! until the bucket has a token *and* `min_interval` has passed since the
//! previous grant on the same lane, so a bucket that filled up while the
//! source was idle still cannot burst past the provider's spacing rule.
//!
//! Callers queue FIFO on the lane mutex and the token is only consumed at
//! grant time, so a caller cancelled mid-wait costs the budget nothing.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

use crate::core::{RateSpec, SourceId};

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
    last_grant: Option<Instant>,
}

struct Lane {
    spec: RateSpec,
    state: Mutex<BucketState>,
}

impl Lane {
    fn new(spec: RateSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(BucketState {
                tokens: f64::from(spec.capacity),
                refilled_at: Instant::now(),
                last_grant: None,
            }),
        }
    }
}

/// Grants permission for outbound requests, one lane per source.
pub struct RateGovernor {
    lanes: HashMap<SourceId, Lane>,
}

impl RateGovernor {
    /// Builds a governor with each provider's published default budget.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(SourceId::ALL.iter().map(|&s| (s, s.default_rate())))
    }

    /// Builds a governor from explicit per-source specs. Sources not listed
    /// are disabled.
    pub fn new(specs: impl IntoIterator<Item = (SourceId, RateSpec)>) -> Self {
        Self {
            lanes: specs
                .into_iter()
                .map(|(id, spec)| (id, Lane::new(spec)))
                .collect(),
        }
    }

    /// Replaces `min_interval` on every configured lane (the CLI
    /// `--rate-limit` override).
    #[must_use]
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        for lane in self.lanes.values_mut() {
            lane.spec.min_interval = min_interval;
        }
        self
    }

    /// Whether the source has any budget at all (`capacity > 0`).
    #[must_use]
    pub fn is_enabled(&self, source: SourceId) -> bool {
        self.lanes.get(&source).is_some_and(|l| l.spec.enabled())
    }

    /// The configured spec for a source, if any.
    #[must_use]
    pub fn spec(&self, source: SourceId) -> Option<RateSpec> {
        self.lanes.get(&source).map(|l| l.spec)
    }

    /// Waits until the source's budget allows one more outbound request.
    ///
    /// Never fails; it only waits (or is cancelled, in which case nothing
    /// is consumed). Callers are served in arrival order.
    ///
    /// # Panics
    ///
    /// Debug builds panic when called for a source that is not configured
    /// or is disabled; the planner filters those out before dispatch.
    pub async fn acquire(&self, source: SourceId) {
        let Some(lane) = self.lanes.get(&source) else {
            debug_assert!(false, "acquire on unconfigured source {source}");
            return;
        };
        debug_assert!(lane.spec.enabled(), "acquire on disabled source {source}");

        // Holding the lane lock across the sleep serializes waiters FIFO
        // and keeps min_interval exact under contention.
        let mut state = lane.state.lock().await;
        loop {
            let now = Instant::now();

            let elapsed = now.saturating_duration_since(state.refilled_at);
            state.tokens = (state.tokens + elapsed.as_secs_f64() * lane.spec.refill_per_sec)
                .min(f64::from(lane.spec.capacity));
            state.refilled_at = now;

            let token_ready_at = if state.tokens >= 1.0 {
                now
            } else if lane.spec.refill_per_sec > 0.0 {
                now + Duration::from_secs_f64((1.0 - state.tokens) / lane.spec.refill_per_sec)
            } else {
                // no refill configured: only the initial burst exists
                now
            };
            let spacing_ready_at = state
                .last_grant
                .map_or(now, |g| g + lane.spec.min_interval);

            let ready_at = token_ready_at.max(spacing_ready_at);
            if ready_at <= now && state.tokens >= 1.0 {
                state.tokens -= 1.0;
                state.last_grant = Some(now);
                return;
            }
            sleep_until(ready_at).await;
        }
    }
}
