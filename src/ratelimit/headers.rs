//! Advisory rate limit headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};

use super::rules::RateRule;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Quota snapshot for one scope key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Rule limit
    pub limit: u64,
    /// Requests still admissible in the current window
    pub remaining: u64,
    /// Unix second at which the oldest retained request leaves the window
    pub reset: i64,
    /// Whole seconds from the snapshot instant until `reset`
    pub retry_after: u64,
}

impl RateLimitHeaders {
    /// Derive headers from the pruned window state.
    ///
    /// `earliest` is the oldest retained timestamp, if any.
    pub fn from_window(
        rule: &RateRule,
        count: u64,
        earliest: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let reset = (earliest.unwrap_or(now) + rule.window()).timestamp();

        Self {
            limit: rule.limit,
            remaining: rule.limit.saturating_sub(count),
            reset,
            retry_after: reset.saturating_sub(now.timestamp()).max(0) as u64,
        }
    }

    /// Write the three `X-RateLimit-*` headers, replacing existing values.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset));
    }
}
