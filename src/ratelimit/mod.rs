//! Rate limiting logic and state management.

mod backend;
mod clock;
mod headers;
mod key;
mod local;
mod rules;
mod shared;
mod store;
mod window;

pub use backend::{Decision, RateLimiterBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use headers::{RateLimitHeaders, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
pub use key::ScopeKey;
pub use local::LocalRateLimiter;
pub use rules::{PolicyTable, RateRule, MAX_WINDOW_SECONDS};
pub use shared::SharedRateLimiter;
pub use store::{AdmitReply, AdmitRequest, RedisWindowStore, WindowState, WindowStore};
pub use window::ClientWindow;
