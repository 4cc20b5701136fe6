//! Error types for the NAS DDNS API service.

use std::time::Duration;
use thiserror::Error;

/// Main error type for service operations.
#[derive(Error, Debug)]
pub enum NasApiError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for NasApiError {
    fn from(err: ::config::ConfigError) -> Self {
        NasApiError::Config(err.to_string())
    }
}

/// Failures talking to the shared rate limit store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store call did not complete within its deadline.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Connection or command failure reported by the Redis client.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store answered with something we could not interpret.
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

/// Errors a rate limiter backend can report for a single evaluation.
///
/// Callers never surface these to clients; see
/// [`rate_limit`](crate::http::rate_limit).
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The shared counting store could not be reached or misbehaved.
    #[error("rate limit store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, NasApiError>;
