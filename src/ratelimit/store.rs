//! Shared window storage.
//!
//! The shared limiter keeps each scope key's request log in a Redis sorted
//! set whose scores are microsecond Unix timestamps. All mutating steps run
//! in one server-side script so concurrent callers on any number of
//! processes cannot interleave between the count and the insert.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::StoreError;

/// Evict, count, conditionally insert, refresh expiry, report the oldest score.
///
/// KEYS[1] = window key
/// ARGV = window_start, now, limit, member, ttl_seconds
const ADMIT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
local admitted = 0
if count < tonumber(ARGV[3]) then
  redis.call('ZADD', KEYS[1], ARGV[2], ARGV[4])
  admitted = 1
  count = count + 1
end
redis.call('EXPIRE', KEYS[1], ARGV[5])
local earliest = -1
local first = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if first[2] then
  earliest = tonumber(first[2])
end
return {admitted, count, earliest}
"#;

/// Parameters for one admission attempt. Timestamps are Unix microseconds.
#[derive(Debug, Clone)]
pub struct AdmitRequest {
    /// Entries scored at or below this are evicted
    pub window_start: i64,
    pub now: i64,
    pub limit: u64,
    /// Unique member name for the new entry
    pub member: String,
    pub ttl_seconds: u64,
}

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitReply {
    pub admitted: bool,
    /// Entries in the window after the attempt
    pub count: u64,
    /// Score of the oldest retained entry after the attempt
    pub earliest: Option<i64>,
}

/// Read-only view of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u64,
    /// Score of the oldest retained entry, in Unix microseconds
    pub earliest: Option<i64>,
}

/// An external store holding sliding-window logs.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically evict expired entries, count, and insert if under the limit.
    async fn admit(&self, key: &str, request: &AdmitRequest) -> Result<AdmitReply, StoreError>;

    /// Count entries scored strictly after `window_start` and find the oldest.
    async fn inspect(&self, key: &str, window_start: i64) -> Result<WindowState, StoreError>;
}

/// [`WindowStore`] backed by Redis sorted sets.
///
/// Each operation, including a lazy connect on first use, completes within
/// the configured timeout or fails with [`StoreError::Timeout`].
pub struct RedisWindowStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    script: Script,
    timeout: Duration,
}

impl RedisWindowStore {
    /// Create a store for `url`. No connection is made until first use.
    pub fn open(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        debug!(url = %sanitize_url(url), timeout_ms = timeout.as_millis() as u64, "Redis window store configured");

        Ok(Self {
            client,
            connection: OnceCell::new(),
            script: Script::new(ADMIT_SCRIPT),
            timeout,
        })
    }

    /// Open the store and verify it answers `PING`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let store = Self::open(url, timeout)?;
        store.ping().await?;
        info!(url = %sanitize_url(url), "Connected to Redis window store");
        Ok(store)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let reply: String = self
            .within_deadline(async {
                let mut conn = self.connection().await?;
                let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok::<String, StoreError>(reply)
            })
            .await?;
        if reply != "PONG" {
            return Err(StoreError::Protocol(format!("PING answered {:?}", reply)));
        }
        Ok(())
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .connection
            .get_or_try_init(|| self.client.get_connection_manager())
            .await?;
        Ok(conn.clone())
    }

    /// Run one whole store operation under this store's deadline.
    async fn within_deadline<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn admit(&self, key: &str, request: &AdmitRequest) -> Result<AdmitReply, StoreError> {
        let mut invocation = self.script.key(key);
        invocation
            .arg(request.window_start)
            .arg(request.now)
            .arg(request.limit)
            .arg(&request.member)
            .arg(request.ttl_seconds);

        let reply: Vec<i64> = self
            .within_deadline(async {
                let mut conn = self.connection().await?;
                let reply: Vec<i64> = invocation.invoke_async(&mut conn).await?;
                Ok::<Vec<i64>, StoreError>(reply)
            })
            .await?;

        match reply.as_slice() {
            [admitted, count, earliest] if *count >= 0 => Ok(AdmitReply {
                admitted: *admitted == 1,
                count: *count as u64,
                earliest: (*earliest >= 0).then_some(*earliest),
            }),
            other => Err(StoreError::Protocol(format!(
                "admit script returned {:?}",
                other
            ))),
        }
    }

    async fn inspect(&self, key: &str, window_start: i64) -> Result<WindowState, StoreError> {
        let min = format!("({}", window_start);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zcount(key, &min, "+inf")
            .zrangebyscore_limit_withscores(key, &min, "+inf", 0, 1);

        let (count, earliest) = self
            .within_deadline(async {
                let mut conn = self.connection().await?;
                let reply: (u64, Vec<(String, f64)>) = pipe.query_async(&mut conn).await?;
                Ok::<_, StoreError>(reply)
            })
            .await?;

        Ok(WindowState {
            count,
            earliest: earliest.first().map(|(_, score)| *score as i64),
        })
    }
}

/// Hide the password part of a Redis URL for logging.
fn sanitize_url(url: &str) -> String {
    match url.split_once('@') {
        Some((credentials, host)) => match credentials.rsplit_once(':') {
            Some((scheme_user, _password)) => format!("{}:***@{}", scheme_user, host),
            None => format!("{}@{}", credentials, host),
        },
        None => url.to_string(),
    }
}
