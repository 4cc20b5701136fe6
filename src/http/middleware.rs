//! Request classification and rate limit decoration.
//!
//! [`rate_limit`] wraps any handler via `axum::middleware::from_fn_with_state`.
//! It derives a scope key from the request, asks the active limiter for a
//! decision, and either short-circuits with 429 or runs the handler and adds
//! the `X-RateLimit-*` headers to whatever it returned.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::response::{error_response, RATE_LIMIT_EXCEEDED};
use crate::error::LimiterError;
use crate::ratelimit::{Decision, RateLimitHeaders, RateLimiterBackend, ScopeKey};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_SERVER: HeaderName = HeaderName::from_static("x-server");
pub const X_API_VERSION: HeaderName = HeaderName::from_static("x-api-version");

pub const SERVER_NAME: &str = "NAS-DDNS-API";
pub const API_VERSION: &str = "2.0.0";

/// Authenticated caller, inserted into request extensions by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub scopes: Vec<String>,
}

/// How a request is classified into a scope key.
#[derive(Clone)]
pub enum KeyExtractor {
    /// The peer's network address
    ClientIp,
    /// The authenticated user id, falling back to the peer address
    Caller,
    /// An application-supplied function
    Custom(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl KeyExtractor {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        KeyExtractor::Custom(Arc::new(f))
    }

    pub fn classify(&self, request: &Request) -> String {
        match self {
            KeyExtractor::ClientIp => client_ip(request),
            KeyExtractor::Caller => request
                .extensions()
                .get::<CallerIdentity>()
                .map(|caller| format!("user:{}", caller.user_id))
                .unwrap_or_else(|| client_ip(request)),
            KeyExtractor::Custom(f) => f(request),
        }
    }
}

impl std::fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyExtractor::ClientIp => f.write_str("ClientIp"),
            KeyExtractor::Caller => f.write_str("Caller"),
            KeyExtractor::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware state: which limiter, which rule, how to classify.
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<dyn RateLimiterBackend>,
    rule: Arc<str>,
    extractor: KeyExtractor,
}

impl RateLimit {
    /// Limit by client IP under `rule`.
    pub fn new(limiter: Arc<dyn RateLimiterBackend>, rule: &str) -> Self {
        Self {
            limiter,
            rule: Arc::from(rule),
            extractor: KeyExtractor::ClientIp,
        }
    }

    pub fn keyed_by(mut self, extractor: KeyExtractor) -> Self {
        self.extractor = extractor;
        self
    }
}

/// Rate limit middleware function.
///
/// Makes one limiter call per request. A store failure admits the request
/// without rate limit headers.
pub async fn rate_limit(State(policy): State<RateLimit>, request: Request, next: Next) -> Response {
    let key = ScopeKey::new(&policy.rule, &policy.extractor.classify(&request));

    let headers = match policy.limiter.check(key.as_str(), &policy.rule).await {
        Ok(Decision::Denied(headers)) => {
            debug!(key = %key, rule = %policy.rule, "Rejecting rate limited request");
            return too_many_requests(headers);
        }
        Ok(Decision::Admitted(headers)) => Some(headers),
        Ok(Decision::Unrestricted) => None,
        Err(LimiterError::StoreUnavailable(e)) => {
            warn!(key = %key, rule = %policy.rule, error = %e, "Rate limit store unavailable, admitting request");
            None
        }
    };

    let mut response = next.run(request).await;
    if let Some(headers) = headers {
        headers.apply(response.headers_mut());
    }
    response
}

fn too_many_requests(headers: RateLimitHeaders) -> Response {
    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        RATE_LIMIT_EXCEEDED,
        format!(
            "Too many requests. Try again in {} seconds.",
            headers.retry_after
        ),
    );
    headers.apply(response.headers_mut());
    response
}

/// Tag every response with a request id and server identification, and log it.
pub async fn request_context(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    info!(method = %method, path = %path, request_id = %request_id, "Request received");

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    headers.insert(X_SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(X_API_VERSION, HeaderValue::from_static(API_VERSION));

    info!(
        method = %method,
        path = %path,
        request_id = %request_id,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}
