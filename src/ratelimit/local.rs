//! In-process rate limiter implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::backend::{Decision, RateLimiterBackend};
use super::clock::{Clock, SystemClock};
use super::headers::RateLimitHeaders;
use super::rules::{PolicyTable, RateRule};
use super::window::ClientWindow;
use crate::error::LimiterError;

/// Sliding-window-log rate limiter backed by process memory.
///
/// Windows live in a sharded map, each behind its own mutex, so evaluations
/// for one key are serialized while different keys proceed independently.
pub struct LocalRateLimiter {
    /// Request logs indexed by scope key
    windows: DashMap<String, Arc<Mutex<ClientWindow>>>,
    policy: Arc<PolicyTable>,
    clock: Arc<dyn Clock>,
}

impl LocalRateLimiter {
    /// Create a new limiter using the wall clock.
    pub fn new(policy: Arc<PolicyTable>) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: Arc<PolicyTable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            policy,
            clock,
        }
    }

    /// Evaluate and, if admitted, record a request for `key` under `rule_name`.
    pub fn evaluate(&self, key: &str, rule_name: &str) -> Decision {
        let Some(rule) = self.policy.rule_for(rule_name) else {
            trace!(key = %key, rule = %rule_name, "Unknown rule, not rate limited");
            return Decision::Unrestricted;
        };

        let window = self.window_for(key, rule);
        let (admitted, headers) = {
            let mut window = window.lock();
            let now = self.clock.now();
            let admitted = window.try_admit(now, rule);
            let headers = RateLimitHeaders::from_window(rule, window.count(), window.earliest(), now);
            (admitted, headers)
        };

        if admitted {
            trace!(key = %key, rule = %rule_name, remaining = headers.remaining, "Request admitted");
            Decision::Admitted(headers)
        } else {
            debug!(key = %key, rule = %rule_name, limit = rule.limit, "Rate limit exceeded");
            Decision::Denied(headers)
        }
    }

    /// Quota for `key` as of now, without recording anything.
    pub fn quota(&self, key: &str, rule_name: &str) -> Option<RateLimitHeaders> {
        let rule = self.policy.rule_for(rule_name)?;
        let now = self.clock.now();

        let window = self.windows.get(key).map(|w| w.value().clone());
        let (count, earliest) = match window {
            Some(window) => {
                let mut window = window.lock();
                window.prune(now);
                (window.count(), window.earliest())
            }
            None => (0, None),
        };

        Some(RateLimitHeaders::from_window(rule, count, earliest, now))
    }

    /// Get or lazily create the window for `key`.
    fn window_for(&self, key: &str, rule: &RateRule) -> Arc<Mutex<ClientWindow>> {
        if let Some(window) = self.windows.get(key) {
            return window.value().clone();
        }

        self.windows
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key = %key, rule = %rule.name, "Creating new rate limit window");
                Arc::new(Mutex::new(ClientWindow::for_rule(rule)))
            })
            .value()
            .clone()
    }

    /// Drop windows that hold no retained requests and are not in use.
    ///
    /// Returns the number of windows removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();

        self.windows.retain(|_, window| {
            // Another evaluation holds a clone; it may be about to record.
            if Arc::strong_count(window) > 1 {
                return true;
            }
            let mut window = window.lock();
            window.prune(now);
            !window.is_empty()
        });

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed = removed, remaining = self.windows.len(), "Swept idle rate limit windows");
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match limiter.upgrade() {
                    Some(limiter) => {
                        limiter.sweep();
                    }
                    None => break,
                }
            }
        })
    }

    /// Number of tracked windows.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(PolicyTable::reference()))
    }
}

#[async_trait]
impl RateLimiterBackend for LocalRateLimiter {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn check(&self, key: &str, rule_name: &str) -> Result<Decision, LimiterError> {
        Ok(self.evaluate(key, rule_name))
    }

    async fn snapshot(
        &self,
        key: &str,
        rule_name: &str,
    ) -> Result<Option<RateLimitHeaders>, LimiterError> {
        Ok(self.quota(key, rule_name))
    }
}
