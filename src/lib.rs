//! NAS DDNS API - management API with sliding-window rate limiting
//!
//! This crate implements the request rate limiting core of the NAS management
//! API: a named policy table, an in-process and a Redis-backed sliding-window
//! limiter sharing one contract, and the axum middleware that classifies
//! requests, rejects over-limit callers with 429, and decorates responses
//! with `X-RateLimit-*` headers.

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
