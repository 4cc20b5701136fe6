//! Shared rate limiter backed by an external window store.
//!
//! Every process pointed at the same store sees the same windows, so limits
//! hold across a fleet of API instances. The store is the only owner of
//! window state; this type keeps a handle to it and nothing else.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::{Decision, RateLimiterBackend};
use super::clock::{Clock, SystemClock};
use super::headers::RateLimitHeaders;
use super::rules::PolicyTable;
use super::store::{AdmitRequest, WindowStore};
use crate::error::{LimiterError, StoreError};

/// Sliding-window-log rate limiter whose windows live in a [`WindowStore`].
pub struct SharedRateLimiter {
    store: Arc<dyn WindowStore>,
    policy: Arc<PolicyTable>,
    clock: Arc<dyn Clock>,
    /// Store calls that failed and were answered fail-open
    store_failures: AtomicU64,
}

impl SharedRateLimiter {
    /// Create a new shared rate limiter using the wall clock.
    pub fn new(store: Arc<dyn WindowStore>, policy: Arc<PolicyTable>) -> Self {
        Self::with_clock(store, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn WindowStore>,
        policy: Arc<PolicyTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            store_failures: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    fn record_failure(&self, err: StoreError) -> LimiterError {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
        LimiterError::StoreUnavailable(err)
    }
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

#[async_trait]
impl RateLimiterBackend for SharedRateLimiter {
    fn kind(&self) -> &'static str {
        "shared"
    }

    async fn check(&self, key: &str, rule_name: &str) -> Result<Decision, LimiterError> {
        let Some(rule) = self.policy.rule_for(rule_name) else {
            trace!(key = %key, rule = %rule_name, "Unknown rule, not rate limited");
            return Ok(Decision::Unrestricted);
        };

        let now = self.clock.now();
        let window_start = now - rule.window();
        let request = AdmitRequest {
            window_start: micros(window_start),
            now: micros(now),
            limit: rule.limit,
            member: format!("{}-{:08x}", micros(now), rand::random::<u32>()),
            ttl_seconds: rule.window_seconds.saturating_mul(2),
        };

        trace!(key = %key, rule = %rule_name, "Checking shared rate limit");

        let reply = self
            .store
            .admit(key, &request)
            .await
            .map_err(|e| self.record_failure(e))?;

        let earliest = reply.earliest.and_then(DateTime::from_timestamp_micros);
        let headers = RateLimitHeaders::from_window(rule, reply.count, earliest, now);

        if reply.admitted {
            Ok(Decision::Admitted(headers))
        } else {
            debug!(
                key = %key,
                rule = %rule_name,
                count = reply.count,
                limit = rule.limit,
                "Shared rate limit exceeded"
            );
            Ok(Decision::Denied(headers))
        }
    }

    async fn snapshot(
        &self,
        key: &str,
        rule_name: &str,
    ) -> Result<Option<RateLimitHeaders>, LimiterError> {
        let Some(rule) = self.policy.rule_for(rule_name) else {
            return Ok(None);
        };

        let now = self.clock.now();
        let window_start = now - rule.window();

        let state = self
            .store
            .inspect(key, micros(window_start))
            .await
            .map_err(|e| self.record_failure(e))?;

        let earliest = state.earliest.and_then(DateTime::from_timestamp_micros);
        Ok(Some(RateLimitHeaders::from_window(rule, state.count, earliest, now)))
    }

    fn store_failures(&self) -> Option<u64> {
        Some(self.store_failures.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::RateRule;
    use crate::ratelimit::store::{AdmitReply, RedisWindowStore, WindowState};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// In-memory stand-in with the same atomicity as the Redis script.
    #[derive(Default)]
    struct MemoryStore {
        sets: Mutex<HashMap<String, Vec<(i64, String)>>>,
    }

    #[async_trait]
    impl WindowStore for MemoryStore {
        async fn admit(&self, key: &str, request: &AdmitRequest) -> Result<AdmitReply, StoreError> {
            let mut sets = self.sets.lock();
            let set = sets.entry(key.to_string()).or_default();
            set.retain(|(score, _)| *score > request.window_start);

            let admitted = (set.len() as u64) < request.limit;
            if admitted {
                set.push((request.now, request.member.clone()));
            }
            Ok(AdmitReply {
                admitted,
                count: set.len() as u64,
                earliest: set.iter().map(|(score, _)| *score).min(),
            })
        }

        async fn inspect(&self, key: &str, window_start: i64) -> Result<WindowState, StoreError> {
            let sets = self.sets.lock();
            let retained: Vec<i64> = sets
                .get(key)
                .map(|set| {
                    set.iter()
                        .map(|(score, _)| *score)
                        .filter(|score| *score > window_start)
                        .collect()
                })
                .unwrap_or_default();

            Ok(WindowState {
                count: retained.len() as u64,
                earliest: retained.iter().min().copied(),
            })
        }
    }

    /// Admits like [`MemoryStore`] but cannot be inspected.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl WindowStore for FlakyStore {
        async fn admit(&self, key: &str, request: &AdmitRequest) -> Result<AdmitReply, StoreError> {
            self.inner.admit(key, request).await
        }

        async fn inspect(&self, _key: &str, _window_start: i64) -> Result<WindowState, StoreError> {
            Err(StoreError::Timeout(Duration::from_millis(250)))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl WindowStore for FailingStore {
        async fn admit(&self, _key: &str, _request: &AdmitRequest) -> Result<AdmitReply, StoreError> {
            Err(StoreError::Timeout(Duration::from_millis(250)))
        }

        async fn inspect(&self, _key: &str, _window_start: i64) -> Result<WindowState, StoreError> {
            Err(StoreError::Protocol("connection reset".into()))
        }
    }

    fn shared_with(
        store: Arc<dyn WindowStore>,
        rules: Vec<RateRule>,
    ) -> (SharedRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let policy = Arc::new(PolicyTable::from_rules(rules).unwrap());
        (SharedRateLimiter::with_clock(store, policy, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (limiter, clock) =
            shared_with(Arc::new(MemoryStore::default()), vec![RateRule::new("test", 3, 10)]);

        for _ in 0..3 {
            assert!(limiter.check("k", "test").await.unwrap().is_admitted());
        }

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check("k", "test").await.unwrap().is_denied());

        clock.advance(Duration::from_secs(10));
        assert!(limiter.check("k", "test").await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_denial_leaves_no_trace() {
        let (limiter, clock) =
            shared_with(Arc::new(MemoryStore::default()), vec![RateRule::new("test", 2, 60)]);

        limiter.check("k", "test").await.unwrap();
        limiter.check("k", "test").await.unwrap();
        let before = limiter.snapshot("k", "test").await.unwrap().unwrap();

        for _ in 0..3 {
            clock.advance(Duration::from_secs(1));
            assert!(limiter.check("k", "test").await.unwrap().is_denied());
        }

        let after = limiter.snapshot("k", "test").await.unwrap().unwrap();
        assert_eq!(after.reset, before.reset);
        assert_eq!(after.remaining, 0);
    }

    #[tokio::test]
    async fn test_headers_after_two_admits() {
        let (limiter, clock) =
            shared_with(Arc::new(MemoryStore::default()), vec![RateRule::new("test", 5, 60)]);

        limiter.check("k", "test").await.unwrap();
        limiter.check("k", "test").await.unwrap();

        let headers = limiter.headers("k", "test").await.unwrap();
        assert_eq!(headers.limit, 5);
        assert_eq!(headers.remaining, 3);
        assert_eq!(headers.reset, clock.now().timestamp() + 60);
    }

    #[tokio::test]
    async fn test_denial_carries_headers_from_admission_reply() {
        let (limiter, clock) =
            shared_with(Arc::new(FlakyStore::default()), vec![RateRule::new("test", 2, 60)]);
        let start = clock.now().timestamp();

        limiter.check("k", "test").await.unwrap();
        limiter.check("k", "test").await.unwrap();
        clock.advance(Duration::from_secs(20));

        // Inspection is down; the denial must not depend on it
        match limiter.check("k", "test").await.unwrap() {
            Decision::Denied(headers) => {
                assert_eq!(headers.limit, 2);
                assert_eq!(headers.remaining, 0);
                assert_eq!(headers.reset, start + 60);
                assert_eq!(headers.retry_after, 40);
            }
            other => panic!("expected denial, got {:?}", other),
        }
        assert_eq!(limiter.store_failures(), Some(0));
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (limiter, _clock) =
            shared_with(Arc::new(MemoryStore::default()), vec![RateRule::new("test", 1, 60)]);

        assert!(!limiter.is_limited("key_a", "test").await);
        assert!(limiter.is_limited("key_a", "test").await);
        assert_eq!(limiter.headers("key_b", "test").await.unwrap().remaining, 1);
        assert!(!limiter.is_limited("key_b", "test").await);
    }

    #[tokio::test]
    async fn test_unknown_rule_is_unrestricted() {
        let (limiter, _clock) = shared_with(Arc::new(FailingStore), vec![RateRule::new("test", 1, 60)]);

        assert_eq!(
            limiter.check("k", "nonexistent_rule").await.unwrap(),
            Decision::Unrestricted
        );
        assert!(limiter.headers("k", "nonexistent_rule").await.is_none());
        assert_eq!(limiter.store_failures(), Some(0));
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let (limiter, _clock) = shared_with(Arc::new(FailingStore), vec![RateRule::new("test", 1, 60)]);

        assert!(matches!(
            limiter.check("k", "test").await,
            Err(LimiterError::StoreUnavailable(StoreError::Timeout(_)))
        ));
        for _ in 0..5 {
            assert!(!limiter.is_limited("k", "test").await);
        }
        assert!(limiter.headers("k", "test").await.is_none());
        assert_eq!(limiter.store_failures(), Some(7));
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_open() {
        let store = RedisWindowStore::open("redis://127.0.0.1:1/", Duration::from_millis(200)).unwrap();
        let (limiter, _clock) = shared_with(Arc::new(store), vec![RateRule::new("test", 1, 60)]);

        assert!(!limiter.is_limited("k", "test").await);
        assert!(!limiter.is_limited("k", "test").await);
        assert_eq!(limiter.store_failures(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_are_exact() {
        let (limiter, _clock) =
            shared_with(Arc::new(MemoryStore::default()), vec![RateRule::new("test", 10, 60)]);
        let limiter = Arc::new(limiter);

        let tasks = (0..100).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check("hot", "test").await.unwrap() })
        });
        let decisions = futures::future::join_all(tasks).await;

        let admitted = decisions
            .into_iter()
            .filter(|d| matches!(d, Ok(Decision::Admitted(_))))
            .count();
        assert_eq!(admitted, 10);
    }
}
