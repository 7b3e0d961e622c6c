//! Message broker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which broker adapter is selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProvider {
    /// Redis Streams with consumer groups.
    Redis,
    /// In-process broker for local development and tests.
    Memory,
}

/// Whether instances compete on one subscription or each get a full copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOutMode {
    /// All instances consume from one named subscription.
    Shared,
    /// Each instance provisions its own subscription.
    Replica,
}

/// Broker subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Adapter used to reach the broker.
    #[serde(default = "default_provider")]
    pub provider: BrokerProvider,
    /// Connection string. Absent or empty disables the relay.
    #[serde(default)]
    pub connection_string: Option<String>,
    /// Topic carrying portal events.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Base (shared) subscription name.
    #[serde(default = "default_subscription_name")]
    pub subscription_name: String,
    /// Fan-out mode.
    #[serde(default = "default_fan_out")]
    pub fan_out: FanOutMode,
    /// Instance identity used in replica subscription names.
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Length of the random suffix appended to replica names.
    #[serde(default = "default_replica_suffix_len")]
    pub replica_suffix_len: usize,
    /// Broker limit on subscription name length.
    #[serde(default = "default_max_subscription_name_len")]
    pub max_subscription_name_len: usize,
    /// Delete the replica subscription when the lease stops.
    #[serde(default = "default_true")]
    pub delete_replica_on_stop: bool,
    /// Maximum messages pulled per receive call.
    #[serde(default = "default_receive_batch_size")]
    pub receive_batch_size: usize,
    /// Upper bound on a single receive call, in milliseconds.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Pause after a failed receive, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Poll interval used by adapters without server-side blocking reads.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Key prefix for broker-side keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            connection_string: None,
            topic: default_topic(),
            subscription_name: default_subscription_name(),
            fan_out: default_fan_out(),
            instance_id: None,
            replica_suffix_len: default_replica_suffix_len(),
            max_subscription_name_len: default_max_subscription_name_len(),
            delete_replica_on_stop: true,
            receive_batch_size: default_receive_batch_size(),
            max_wait_ms: default_max_wait_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl BrokerConfig {
    /// The connection string, if one is configured and non-blank.
    pub fn connection_string(&self) -> Option<&str> {
        self.connection_string
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether the relay has enough configuration to run.
    ///
    /// The in-process provider needs no connection string.
    pub fn is_enabled(&self) -> bool {
        self.provider == BrokerProvider::Memory || self.connection_string().is_some()
    }

    /// Identity used for replica subscription names.
    pub fn instance_identity(&self) -> String {
        self.instance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| "instance".to_string())
    }

    /// Maximum wait per receive call.
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Backoff after a failed receive call.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Poll interval for adapters that poll.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_provider() -> BrokerProvider {
    BrokerProvider::Redis
}

fn default_topic() -> String {
    "portal-events".to_string()
}

fn default_subscription_name() -> String {
    "portal-dashboard".to_string()
}

fn default_fan_out() -> FanOutMode {
    FanOutMode::Replica
}

fn default_replica_suffix_len() -> usize {
    8
}

fn default_max_subscription_name_len() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_receive_batch_size() -> usize {
    25
}

fn default_max_wait_ms() -> u64 {
    5000
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_key_prefix() -> String {
    "relay:".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_connection_string_disables_relay() {
        let mut config = BrokerConfig::default();
        assert!(!config.is_enabled());

        config.connection_string = Some("   ".to_string());
        assert!(!config.is_enabled());

        config.connection_string = Some("redis://localhost:6379".to_string());
        assert!(config.is_enabled());
    }

    #[test]
    fn test_memory_provider_needs_no_connection_string() {
        let config = BrokerConfig {
            provider: BrokerProvider::Memory,
            ..BrokerConfig::default()
        };
        assert!(config.is_enabled());
    }

    #[test]
    fn test_explicit_instance_id_wins() {
        let config = BrokerConfig {
            instance_id: Some("web-1".to_string()),
            ..BrokerConfig::default()
        };
        assert_eq!(config.instance_identity(), "web-1");
    }
}
