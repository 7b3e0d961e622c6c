//! A single event stream connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::frame::StreamFrame;
use crate::metrics::RelayMetrics;
use crate::multiplexer::Subscription;

/// Unique connection identifier
pub type ConnectionId = Uuid;

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of a stream connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Authenticated, not yet registered for events
    Connecting,
    /// Receiving events and keepalives
    Open,
    /// Torn down
    Closed,
}

/// Result of queueing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame queued
    Sent,
    /// Buffer full, frame dropped
    Dropped,
    /// Client gone or connection not open
    Closed,
}

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away.
    ClientDisconnected,
    /// The server is shutting the connection down.
    ServerShutdown,
}

/// Handle to one open event stream.
///
/// Holds the sender for pushing frames to the client, the tenant filter
/// key, and the multiplexer subscription that is released exactly once on
/// close.
#[derive(Debug)]
pub struct StreamConnection {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Tenant this stream is scoped to
    pub tenant_id: String,
    /// Identity subject that opened the stream
    pub subject: String,
    /// When the connection was established
    pub connected_at: DateTime<Utc>,
    state: AtomicU8,
    sender: mpsc::Sender<StreamFrame>,
    cancel: CancellationToken,
    subscription: Mutex<Option<Subscription>>,
    metrics: Arc<RelayMetrics>,
}

impl StreamConnection {
    /// Create a connection in the `Connecting` state.
    pub fn new(
        tenant_id: String,
        subject: String,
        sender: mpsc::Sender<StreamFrame>,
        cancel: CancellationToken,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            subject,
            connected_at: Utc::now(),
            state: AtomicU8::new(CONNECTING),
            sender,
            cancel,
            subscription: Mutex::new(None),
            metrics,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            CONNECTING => ConnectionState::Connecting,
            OPEN => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) == OPEN
    }

    /// Token cancelled when the connection closes.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Move `Connecting → Open`. Returns `false` if already closed.
    pub(crate) fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(CONNECTING, OPEN, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Attach the multiplexer subscription.
    ///
    /// If the connection closed while subscribing, the subscription is
    /// released here instead, so it is released exactly once either way.
    pub(crate) async fn attach_subscription(&self, subscription: Subscription) {
        let mut slot = self.subscription.lock().await;
        if self.state.load(Ordering::SeqCst) == CLOSED {
            drop(slot);
            subscription.unsubscribe().await;
            return;
        }
        *slot = Some(subscription);
    }

    /// Queue a frame without waiting.
    pub fn push(&self, frame: StreamFrame) -> PushOutcome {
        if !self.is_open() {
            return PushOutcome::Closed;
        }
        match self.sender.try_send(frame) {
            Ok(()) => {
                RelayMetrics::incr(&self.metrics.frames_sent);
                PushOutcome::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                RelayMetrics::incr(&self.metrics.frames_dropped);
                warn!(conn_id = %self.id, "Stream buffer full, dropping frame");
                PushOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Move to `Closed`, stop keepalive, and release the subscription.
    ///
    /// Only the first call does anything; it returns `true`.
    pub async fn close(&self, reason: CloseReason) -> bool {
        if self.state.swap(CLOSED, Ordering::SeqCst) == CLOSED {
            return false;
        }
        self.cancel.cancel();

        let subscription = self.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
        }

        RelayMetrics::incr(&self.metrics.connections_closed);
        debug!(conn_id = %self.id, tenant_id = %self.tenant_id, ?reason, "Stream connection closed");
        true
    }
}
