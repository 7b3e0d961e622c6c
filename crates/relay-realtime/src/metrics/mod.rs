//! Relay metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Relay-level counters.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Broker messages parsed into events
    pub events_received: AtomicU64,
    /// Events handed to a stream connection
    pub events_dispatched: AtomicU64,
    /// Broker messages dropped as malformed
    pub messages_dropped: AtomicU64,
    /// Failed receive calls
    pub receive_failures: AtomicU64,
    /// Callbacks that panicked
    pub callback_panics: AtomicU64,
    /// Stream connections opened
    pub connections_opened: AtomicU64,
    /// Stream connections closed
    pub connections_closed: AtomicU64,
    /// Frames queued to connections
    pub frames_sent: AtomicU64,
    /// Frames dropped because a connection buffer was full
    pub frames_dropped: AtomicU64,
}

impl RelayMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Broker messages parsed into events
    pub events_received: u64,
    /// Events handed to a stream connection
    pub events_dispatched: u64,
    /// Broker messages dropped as malformed
    pub messages_dropped: u64,
    /// Failed receive calls
    pub receive_failures: u64,
    /// Callbacks that panicked
    pub callback_panics: u64,
    /// Stream connections opened
    pub connections_opened: u64,
    /// Stream connections closed
    pub connections_closed: u64,
    /// Frames queued to connections
    pub frames_sent: u64,
    /// Frames dropped because a connection buffer was full
    pub frames_dropped: u64,
}
