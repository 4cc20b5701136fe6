//! HTTP routes for the management API.

use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

use super::middleware::{rate_limit, request_context, KeyExtractor, RateLimit, API_VERSION};
use super::response::{error_response, success_response, BAD_REQUEST, RESOURCE_NOT_FOUND};
use crate::ratelimit::{PolicyTable, RateLimiterBackend, ScopeKey};

/// Rule whose quota `GET /api/v2/ratelimit/quota` reports.
const QUOTA_RULE: &str = "per_ip";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiterBackend>,
    pub policy: Arc<PolicyTable>,
}

impl AppState {
    pub fn new(limiter: Arc<dyn RateLimiterBackend>, policy: Arc<PolicyTable>) -> Self {
        Self { limiter, policy }
    }

    fn limit(&self, rule: &str) -> RateLimit {
        RateLimit::new(self.limiter.clone(), rule)
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let per_ip = state.limit("per_ip");
    let global = state.limit("global");
    let ddns = state.limit("ddns").keyed_by(KeyExtractor::Caller);

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v2/ratelimit/rules",
            get(list_rules).layer(from_fn_with_state(per_ip, rate_limit)),
        )
        .route(
            "/api/v2/ratelimit/quota",
            get(caller_quota).layer(from_fn_with_state(global.clone(), rate_limit)),
        )
        .route(
            "/api/v2/status",
            get(system_status).layer(from_fn_with_state(global, rate_limit)),
        )
        .route(
            "/api/v2/ddns/update",
            post(ddns_update).layer(from_fn_with_state(ddns, rate_limit)),
        )
        .fallback(not_found)
        .layer(from_fn(request_context))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = json!({
        "status": "ok",
        "limiter": state.limiter.kind(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    if let Some(failures) = state.limiter.store_failures() {
        body["store_failures"] = json!(failures);
    }
    Json(body)
}

async fn list_rules(State(state): State<AppState>) -> Response {
    success_response(StatusCode::OK, state.policy.rules())
}

/// The caller's remaining per-address quota, read without consuming it.
async fn caller_quota(State(state): State<AppState>, request: Request) -> Response {
    let key = ScopeKey::new(QUOTA_RULE, &KeyExtractor::ClientIp.classify(&request));

    let quota = state.limiter.headers(key.as_str(), QUOTA_RULE).await;
    success_response(
        StatusCode::OK,
        json!({
            "rule": QUOTA_RULE,
            "limit": quota.map(|q| q.limit),
            "remaining": quota.map(|q| q.remaining),
            "reset": quota.map(|q| q.reset),
        }),
    )
}

async fn system_status(State(state): State<AppState>) -> Response {
    success_response(
        StatusCode::OK,
        json!({
            "api": "online",
            "api_version": API_VERSION,
            "limiter": state.limiter.kind(),
            "server_time": Utc::now().to_rfc3339(),
        }),
    )
}

/// Body of a DDNS update request.
#[derive(Debug, Deserialize)]
pub struct DdnsUpdateRequest {
    pub domain: String,
    /// Address to publish; the provider's detected address is used when absent
    #[serde(default)]
    pub ip: Option<String>,
}

async fn ddns_update(Json(request): Json<DdnsUpdateRequest>) -> Response {
    let domain = request.domain.trim();
    if domain.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, BAD_REQUEST, "domain is required");
    }

    let ip = match request.ip.as_deref().map(str::parse::<IpAddr>) {
        Some(Ok(ip)) => Some(ip),
        Some(Err(_)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                BAD_REQUEST,
                format!("invalid ip address: {}", request.ip.unwrap_or_default()),
            );
        }
        None => None,
    };

    info!(domain = %domain, ip = ?ip, "DDNS update accepted");

    success_response(
        StatusCode::ACCEPTED,
        json!({
            "domain": domain,
            "ip": ip.map(|ip| ip.to_string()),
            "status": "queued",
            "requested_at": Utc::now().to_rfc3339(),
        }),
    )
}

async fn not_found(uri: Uri) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        RESOURCE_NOT_FOUND,
        format!("No route for {}", uri.path()),
    )
}
