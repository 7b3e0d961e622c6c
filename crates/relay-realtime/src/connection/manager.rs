//! Connection manager: opens, tracks and tears down event streams.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use relay_core::config::realtime::RealtimeConfig;
use relay_core::error::AppError;
use relay_core::result::AppResult;

use crate::message::frame::StreamFrame;
use crate::metrics::RelayMetrics;
use crate::multiplexer::LocalEventMultiplexer;

use super::handle::{CloseReason, ConnectionId, PushOutcome, StreamConnection};
use super::heartbeat::run_keepalive;
use super::pool::ConnectionPool;

/// Manages all open event stream connections.
#[derive(Debug)]
pub struct ConnectionManager {
    pool: Arc<ConnectionPool>,
    multiplexer: Arc<LocalEventMultiplexer>,
    metrics: Arc<RelayMetrics>,
    config: RealtimeConfig,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Creates a connection manager. Cancelling `shutdown` refuses new streams.
    pub fn new(
        config: RealtimeConfig,
        multiplexer: Arc<LocalEventMultiplexer>,
        metrics: Arc<RelayMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new()),
            multiplexer,
            metrics,
            config,
            shutdown,
        }
    }

    /// Opens a stream for an authenticated tenant.
    ///
    /// The connected comment is queued first, then the tenant-filtered
    /// callback is registered, then keepalive starts. Returns the handle and
    /// the receiver the transport drains.
    pub async fn open(
        &self,
        tenant_id: String,
        subject: String,
    ) -> AppResult<(Arc<StreamConnection>, mpsc::Receiver<StreamFrame>)> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::service_unavailable("Relay is shutting down"));
        }

        let (tx, rx) = mpsc::channel(self.config.connection_buffer.max(1));
        let conn = Arc::new(StreamConnection::new(
            tenant_id,
            subject,
            tx,
            self.shutdown.child_token(),
            self.metrics.clone(),
        ));

        conn.mark_open();
        conn.push(StreamFrame::connected());

        let weak: Weak<StreamConnection> = Arc::downgrade(&conn);
        let tenant = conn.tenant_id.clone();
        let metrics = self.metrics.clone();
        let subscription = self
            .multiplexer
            .subscribe(move |event| {
                if !event.is_for_tenant(&tenant) {
                    return;
                }
                let Some(conn) = weak.upgrade() else {
                    return;
                };
                if conn.push(StreamFrame::Event(event.clone())) == PushOutcome::Sent {
                    RelayMetrics::incr(&metrics.events_dispatched);
                }
            })
            .await?;
        conn.attach_subscription(subscription).await;

        self.pool.add(conn.clone());
        RelayMetrics::incr(&self.metrics.connections_opened);

        let pool = self.pool.clone();
        let keepalive = conn.clone();
        let interval = Duration::from_secs(self.config.keepalive_interval_seconds.max(1));
        tokio::spawn(async move {
            run_keepalive(keepalive.clone(), interval).await;
            if !keepalive.is_open() {
                pool.remove(&keepalive.id);
            }
        });

        info!(
            conn_id = %conn.id,
            tenant_id = %conn.tenant_id,
            subject = %conn.subject,
            "Event stream opened"
        );

        Ok((conn, rx))
    }

    /// Closes a stream. Returns `false` if it was unknown or already closed.
    pub async fn close(&self, conn_id: &ConnectionId, reason: CloseReason) -> bool {
        match self.pool.remove(conn_id) {
            Some(conn) => {
                let closed = conn.close(reason).await;
                if closed {
                    info!(conn_id = %conn_id, tenant_id = %conn.tenant_id, ?reason, "Event stream closed");
                }
                closed
            }
            None => {
                debug!(conn_id = %conn_id, "Close requested for unknown stream");
                false
            }
        }
    }

    /// Closes every open stream. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for conn in self.pool.all_connections() {
            if self.close(&conn.id, CloseReason::ServerShutdown).await {
                closed += 1;
            }
        }
        closed
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Number of open streams.
    pub fn connection_count(&self) -> usize {
        self.pool.connection_count()
    }
}
