//! Event stream connection configuration.

use serde::{Deserialize, Serialize};

/// Per-connection streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Interval between keepalive comment frames, in seconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_seconds: u64,
    /// Outbound frame buffer per connection. Frames are dropped when full.
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_seconds: default_keepalive_interval(),
            connection_buffer: default_connection_buffer(),
        }
    }
}

fn default_keepalive_interval() -> u64 {
    15
}

fn default_connection_buffer() -> usize {
    256
}
