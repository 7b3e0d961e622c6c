//! Admission control configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bucket names with built-in limits.
pub const KNOWN_BUCKETS: [&str; 3] = ["api", "negotiate", "events"];

/// A fixed-window limit: at most `max` requests per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Requests allowed per window.
    pub max: u64,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimitRule {
    /// Window length as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Built-in rule for a bucket name.
    pub fn builtin(bucket: &str) -> Self {
        let max = match bucket {
            "negotiate" => 60,
            "events" => 30,
            _ => 300,
        };
        Self {
            max,
            window_ms: 60_000,
        }
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Run an expiry sweep every this many checks.
    #[serde(default = "default_sweep_every")]
    pub sweep_every: u64,
    /// Per-bucket overrides.
    #[serde(default)]
    pub buckets: HashMap<String, RateLimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sweep_every: default_sweep_every(),
            buckets: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// The effective rule for a bucket.
    pub fn rule(&self, bucket: &str) -> RateLimitRule {
        self.buckets
            .get(bucket)
            .copied()
            .unwrap_or_else(|| RateLimitRule::builtin(bucket))
    }
}

fn default_sweep_every() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules() {
        let config = RateLimitConfig::default();
        assert_eq!(config.rule("api").max, 300);
        assert_eq!(config.rule("negotiate").max, 60);
        assert_eq!(config.rule("events").window_ms, 60_000);
    }

    #[test]
    fn test_override_replaces_builtin() {
        let mut config = RateLimitConfig::default();
        config.buckets.insert(
            "api".to_string(),
            RateLimitRule {
                max: 5,
                window_ms: 1000,
            },
        );
        assert_eq!(config.rule("api").max, 5);
        assert_eq!(config.rule("api").window(), Duration::from_secs(1));
        assert_eq!(config.rule("events").max, 30);
    }
}
