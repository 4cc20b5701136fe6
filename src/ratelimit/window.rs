//! Sliding-window request log.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::rules::RateRule;

/// Timestamps of recent requests for one scope key.
///
/// After [`prune`](Self::prune) at instant `t`, the log holds exactly the
/// timestamps in `(t - window, t]`. The window length follows the rule of the
/// most recent [`try_admit`](Self::try_admit).
#[derive(Debug, Clone)]
pub struct ClientWindow {
    timestamps: VecDeque<DateTime<Utc>>,
    window: chrono::Duration,
}

impl ClientWindow {
    pub fn for_rule(rule: &RateRule) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window: rule.window(),
        }
    }

    /// Drop every timestamp at or before `now - window`.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let window_start = now - self.window;
        self.timestamps.retain(|t| *t > window_start);
    }

    /// Prune under `rule`'s window, then record `now` if fewer than `rule.limit`
    /// requests remain.
    ///
    /// Returns `true` if the request is admitted. A denied request is not recorded.
    pub fn try_admit(&mut self, now: DateTime<Utc>, rule: &RateRule) -> bool {
        self.window = rule.window();
        self.prune(now);

        if self.timestamps.len() as u64 >= rule.limit {
            return false;
        }

        self.timestamps.push_back(now);
        true
    }

    /// Number of retained timestamps.
    pub fn count(&self) -> u64 {
        self.timestamps.len() as u64
    }

    /// Oldest retained timestamp.
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().min().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
