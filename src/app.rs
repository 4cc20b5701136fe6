//! Limiter selection and application wiring.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{NasApiConfig, RateLimitingConfig};
use crate::error::Result;
use crate::http::{router, AppState};
use crate::ratelimit::{
    LocalRateLimiter, PolicyTable, RateLimiterBackend, RedisWindowStore, SharedRateLimiter,
};

/// A ready-to-serve application: state, router, and background tasks.
pub struct App {
    pub state: AppState,
    sweeper: Option<JoinHandle<()>>,
}

impl App {
    /// Build the policy table and pick the limiter strategy from configuration.
    pub async fn build(config: &NasApiConfig) -> Result<Self> {
        let policy = Arc::new(match &config.rate_limiting.rules_path {
            Some(path) => PolicyTable::from_file(path)?,
            None => PolicyTable::reference(),
        });
        info!(rules = policy.len(), "Rate limit policy loaded");

        let (limiter, sweeper) = select_limiter(&config.rate_limiting, policy.clone()).await;
        info!(limiter = limiter.kind(), "Rate limiter initialized");

        Ok(Self {
            state: AppState::new(limiter, policy),
            sweeper,
        })
    }

    pub fn router(&self) -> axum::Router {
        router(self.state.clone())
    }

    /// Stop background tasks.
    pub fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }
    }
}

/// Use the shared limiter when a store URL is configured and reachable,
/// otherwise the in-process limiter with its eviction sweeper.
async fn select_limiter(
    config: &RateLimitingConfig,
    policy: Arc<PolicyTable>,
) -> (Arc<dyn RateLimiterBackend>, Option<JoinHandle<()>>) {
    if let Some(url) = &config.redis_url {
        match RedisWindowStore::connect(url, config.store_timeout()).await {
            Ok(store) => {
                let limiter: Arc<dyn RateLimiterBackend> =
                    Arc::new(SharedRateLimiter::new(Arc::new(store), policy));
                return (limiter, None);
            }
            Err(e) => {
                warn!(error = %e, "Failed to initialize shared rate limiter, using in-memory limiter");
            }
        }
    }

    let limiter = Arc::new(LocalRateLimiter::new(policy));
    let sweeper = limiter.spawn_sweeper(config.sweep_interval());
    let limiter: Arc<dyn RateLimiterBackend> = limiter;
    (limiter, Some(sweeper))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_select_local_limiter() {
        let app = App::build(&NasApiConfig::default()).await.unwrap();
        assert_eq!(app.state.limiter.kind(), "local");
        assert_eq!(app.state.policy.len(), 5);
        app.shutdown();
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_local() {
        let mut config = NasApiConfig::default();
        config.rate_limiting.redis_url = Some("redis://127.0.0.1:1/".into());
        config.rate_limiting.store_timeout_ms = 200;

        let app = App::build(&config).await.unwrap();
        assert_eq!(app.state.limiter.kind(), "local");
        app.shutdown();
    }

    #[tokio::test]
    async fn test_missing_rules_file_is_an_error() {
        let mut config = NasApiConfig::default();
        config.rate_limiting.rules_path = Some("/nonexistent/rules.yaml".into());
        assert!(App::build(&config).await.is_err());
    }
}
