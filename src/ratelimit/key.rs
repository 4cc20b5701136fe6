//! Scope key generation.

/// A key that names one independently tracked quota.
///
/// The key is composed of the rule name and a caller classification token
/// (an IP address, a user id, ...), rendered as `ratelimit:{rule}:{caller}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Prefix shared by every scope key, also used as the Redis key namespace.
    pub const PREFIX: &'static str = "ratelimit";

    pub fn new(rule_name: &str, classification: &str) -> Self {
        Self(format!("{}:{}:{}", Self::PREFIX, rule_name, classification))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ScopeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key_format() {
        let key = ScopeKey::new("per_ip", "192.168.1.10");
        assert_eq!(key.as_str(), "ratelimit:per_ip:192.168.1.10");
        assert_eq!(key.to_string(), "ratelimit:per_ip:192.168.1.10");
    }

    #[test]
    fn test_scope_key_equality() {
        let a = ScopeKey::new("auth", "alice");
        let b = ScopeKey::new("auth", "alice");
        let c = ScopeKey::new("ddns", "alice");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
