//! Keepalive comments for idle streams.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::message::frame::StreamFrame;

use super::handle::{CloseReason, PushOutcome, StreamConnection};

/// Run the keepalive loop for a connection.
///
/// Sends a comment frame every `interval` so proxies do not time out an
/// idle stream. Exits when the connection's token is cancelled, and closes
/// the connection itself if the client has gone away.
pub async fn run_keepalive(conn: Arc<StreamConnection>, interval: Duration) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let cancel = conn.cancellation().clone();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if conn.push(StreamFrame::keepalive()) == PushOutcome::Closed {
            debug!(conn_id = %conn.id, "Keepalive found stream closed");
            conn.close(CloseReason::ClientDisconnected).await;
            break;
        }
    }

    debug!(conn_id = %conn.id, "Keepalive loop ended");
}
