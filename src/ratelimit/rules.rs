//! Rate limit policy table.
//!
//! A policy table maps rule names (`global`, `per_ip`, ...) to a limit and a
//! sliding window length. The table is built once at startup, either from
//! the compiled-in reference policy or from a YAML file, and is read-only
//! afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{NasApiError, Result};

/// Longest accepted window: one leap year.
pub const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 60 * 60;

/// A named rate limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule {
    /// Rule identifier, e.g. `per_ip`
    pub name: String,
    /// Maximum admitted requests per window
    pub limit: u64,
    /// Sliding window length in seconds
    pub window_seconds: u64,
}

impl RateRule {
    pub fn new(name: impl Into<String>, limit: u64, window_seconds: u64) -> Self {
        Self {
            name: name.into(),
            limit,
            window_seconds,
        }
    }

    /// The window length, capped at [`MAX_WINDOW_SECONDS`].
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_seconds.min(MAX_WINDOW_SECONDS) as i64)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(NasApiError::Config("rate rule name must not be empty".into()));
        }
        if self.limit == 0 {
            return Err(NasApiError::Config(format!(
                "rate rule '{}' must have a positive limit",
                self.name
            )));
        }
        if self.window_seconds == 0 {
            return Err(NasApiError::Config(format!(
                "rate rule '{}' must have a positive window",
                self.name
            )));
        }
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(NasApiError::Config(format!(
                "rate rule '{}' window of {}s exceeds the maximum of {}s",
                self.name, self.window_seconds, MAX_WINDOW_SECONDS
            )));
        }
        Ok(())
    }
}

/// On-disk layout of a rules file.
#[derive(Debug, Deserialize)]
struct RulesFile {
    rules: Vec<RateRule>,
}

/// Fixed mapping from rule name to [`RateRule`].
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: HashMap<String, RateRule>,
}

impl PolicyTable {
    /// The reference policy shipped with the service.
    pub fn reference() -> Self {
        let rules = [
            RateRule::new("global", 1000, 60),
            RateRule::new("per_user", 100, 60),
            RateRule::new("per_ip", 50, 60),
            RateRule::new("auth", 10, 300),
            RateRule::new("ddns", 5, 300),
        ];
        Self {
            rules: rules.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    /// Build a table from a list of rules, rejecting invalid or duplicate entries.
    pub fn from_rules<I: IntoIterator<Item = RateRule>>(rules: I) -> Result<Self> {
        let mut map = HashMap::new();
        for rule in rules {
            rule.validate()?;
            if map.contains_key(&rule.name) {
                return Err(NasApiError::Config(format!(
                    "duplicate rate rule '{}'",
                    rule.name
                )));
            }
            map.insert(rule.name.clone(), rule);
        }
        Ok(Self { rules: map })
    }

    /// Load a table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a table from a YAML string of the form `rules: [{name, limit, window_seconds}]`.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: RulesFile = serde_yaml::from_str(yaml)
            .map_err(|e| NasApiError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        Self::from_rules(file.rules)
    }

    /// Look up a rule by name.
    pub fn rule_for(&self, name: &str) -> Option<&RateRule> {
        self.rules.get(name)
    }

    /// All rules, sorted by name.
    pub fn rules(&self) -> Vec<&RateRule> {
        let mut rules: Vec<&RateRule> = self.rules.values().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::reference()
    }
}
