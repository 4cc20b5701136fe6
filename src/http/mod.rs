//! HTTP surface: router, rate limit middleware, and server.

mod middleware;
mod response;
mod routes;
mod server;

pub use middleware::{
    rate_limit, request_context, CallerIdentity, KeyExtractor, RateLimit, API_VERSION,
    SERVER_NAME, X_API_VERSION, X_REQUEST_ID, X_SERVER,
};
pub use response::{error_response, success_response};
pub use routes::{router, AppState, DdnsUpdateRequest};
pub use server::HttpServer;
