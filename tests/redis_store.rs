//! Shared limiter tests against a live Redis.
//!
//! These run only when `REDIS_URL` is set, e.g.
//! `REDIS_URL=redis://127.0.0.1:6379/15 cargo test --test redis_store`.

use std::sync::Arc;
use std::time::Duration;

use nas_ddns_api::ratelimit::{
    Clock, Decision, ManualClock, PolicyTable, RateLimiterBackend, RateRule, RedisWindowStore,
    SharedRateLimiter,
};

async fn shared_limiter(rules: Vec<RateRule>) -> Option<(Arc<SharedRateLimiter>, Arc<ManualClock>)> {
    let url = std::env::var("REDIS_URL").ok()?;
    let store = RedisWindowStore::connect(&url, Duration::from_secs(1))
        .await
        .expect("REDIS_URL is set but Redis is not reachable");

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let policy = Arc::new(PolicyTable::from_rules(rules).unwrap());
    let limiter = SharedRateLimiter::with_clock(Arc::new(store), policy, clock.clone());
    Some((Arc::new(limiter), clock))
}

fn unique_key(label: &str) -> String {
    format!("ratelimit:test:{}:{}", label, uuid::Uuid::new_v4())
}

#[tokio::test]
async fn test_redis_window_slides() {
    let Some((limiter, clock)) = shared_limiter(vec![RateRule::new("test", 3, 10)]).await else {
        return;
    };
    let key = unique_key("slides");

    for _ in 0..3 {
        assert!(limiter.check(&key, "test").await.unwrap().is_admitted());
    }
    clock.advance(Duration::from_secs(1));
    assert!(limiter.check(&key, "test").await.unwrap().is_denied());

    clock.advance(Duration::from_secs(10));
    assert!(limiter.check(&key, "test").await.unwrap().is_admitted());
}

#[tokio::test]
async fn test_redis_headers_and_no_self_penalty() {
    let Some((limiter, clock)) = shared_limiter(vec![RateRule::new("test", 5, 60)]).await else {
        return;
    };
    let key = unique_key("headers");
    let start = clock.now().timestamp();

    limiter.check(&key, "test").await.unwrap();
    limiter.check(&key, "test").await.unwrap();

    let headers = limiter.headers(&key, "test").await.unwrap();
    assert_eq!(headers.limit, 5);
    assert_eq!(headers.remaining, 3);
    assert_eq!(headers.reset, start + 60);

    for _ in 0..3 {
        limiter.check(&key, "test").await.unwrap();
    }
    for _ in 0..5 {
        clock.advance(Duration::from_secs(1));
        let decision = limiter.check(&key, "test").await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.headers().unwrap().reset, start + 60);
    }
    let headers = limiter.headers(&key, "test").await.unwrap();
    assert_eq!(headers.remaining, 0);
    assert_eq!(headers.reset, start + 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_concurrent_admissions_are_exact() {
    let Some((limiter, _clock)) = shared_limiter(vec![RateRule::new("test", 10, 60)]).await else {
        return;
    };
    let key = Arc::new(unique_key("concurrent"));

    let tasks = (0..100).map(|_| {
        let limiter = limiter.clone();
        let key = key.clone();
        tokio::spawn(async move { limiter.check(&key, "test").await.unwrap() })
    });
    let decisions = futures::future::join_all(tasks).await;

    let admitted = decisions
        .into_iter()
        .filter(|d| matches!(d, Ok(Decision::Admitted(_))))
        .count();
    assert_eq!(admitted, 10);
    assert_eq!(limiter.store_failures(), Some(0));
}
