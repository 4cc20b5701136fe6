//! Rate limiter trait for abstracting local and shared implementations.

use async_trait::async_trait;
use tracing::warn;

use super::headers::RateLimitHeaders;
use crate::error::LimiterError;

/// Outcome of evaluating one request against its rule.
///
/// Admitted and denied outcomes carry the quota as of the evaluation, so a
/// caller never needs a second round trip to decorate its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request fits in the window and was recorded.
    Admitted(RateLimitHeaders),
    /// The window is full. Nothing was recorded.
    Denied(RateLimitHeaders),
    /// No rule with that name exists, so the request is not rate limited.
    Unrestricted,
}

impl Decision {
    pub fn is_denied(&self) -> bool {
        matches!(self, Decision::Denied(_))
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted(_))
    }

    /// Quota after the evaluation, if a rule applied.
    pub fn headers(&self) -> Option<RateLimitHeaders> {
        match self {
            Decision::Admitted(headers) | Decision::Denied(headers) => Some(*headers),
            Decision::Unrestricted => None,
        }
    }
}

/// Trait for rate limiter implementations.
///
/// This trait abstracts over both the in-process `LocalRateLimiter` and the
/// store-backed `SharedRateLimiter` so the HTTP layer can work with either.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Short name for logs and health output (`local`, `shared`).
    fn kind(&self) -> &'static str;

    /// Atomically prune the window for `key`, decide, and record on admission.
    async fn check(&self, key: &str, rule_name: &str) -> Result<Decision, LimiterError>;

    /// Current quota for `key` without recording anything, or `None` when
    /// `rule_name` is unknown.
    async fn snapshot(
        &self,
        key: &str,
        rule_name: &str,
    ) -> Result<Option<RateLimitHeaders>, LimiterError>;

    /// Store failures answered fail-open since startup, for backends that use a store.
    fn store_failures(&self) -> Option<u64> {
        None
    }

    /// Whether the request should be rejected.
    ///
    /// Store failures fail open: the request is treated as admitted.
    async fn is_limited(&self, key: &str, rule_name: &str) -> bool {
        match self.check(key, rule_name).await {
            Ok(decision) => decision.is_denied(),
            Err(LimiterError::StoreUnavailable(e)) => {
                warn!(key = %key, rule = %rule_name, error = %e, "Rate limit store unavailable, admitting request");
                false
            }
        }
    }

    /// Headers for `key`, or `None` when the rule is unknown or the store is unavailable.
    async fn headers(&self, key: &str, rule_name: &str) -> Option<RateLimitHeaders> {
        match self.snapshot(key, rule_name).await {
            Ok(headers) => headers,
            Err(LimiterError::StoreUnavailable(e)) => {
                warn!(key = %key, rule = %rule_name, error = %e, "Rate limit store unavailable, omitting headers");
                None
            }
        }
    }
}
