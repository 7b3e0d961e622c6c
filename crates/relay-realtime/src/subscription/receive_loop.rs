//! The receive loop run while a lease is active.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::events::PortalEvent;
use relay_core::traits::{BrokerMessage, BrokerReceiver};

use crate::metrics::RelayMetrics;
use crate::multiplexer::EventSink;

/// Settings and collaborators for one receive loop.
pub(crate) struct ReceiveLoop {
    pub subscription: String,
    pub sink: Arc<dyn EventSink>,
    pub metrics: Arc<RelayMetrics>,
    pub batch_size: usize,
    pub max_wait: Duration,
    pub retry_backoff: Duration,
}

impl ReceiveLoop {
    /// Pull, parse, publish, and acknowledge until `cancel` fires.
    ///
    /// Receive failures are logged and retried after a fixed backoff. The
    /// receiver is handed back so the caller can close it.
    pub async fn run(
        self,
        mut receiver: Box<dyn BrokerReceiver>,
        cancel: CancellationToken,
    ) -> Box<dyn BrokerReceiver> {
        info!(subscription = %self.subscription, "Broker receive loop started");

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = receiver.receive_messages(self.batch_size, self.max_wait) => batch,
            };

            match batch {
                Ok(messages) => {
                    for message in messages {
                        self.handle_message(receiver.as_mut(), message).await;
                    }
                }
                Err(e) => {
                    RelayMetrics::incr(&self.metrics.receive_failures);
                    warn!(
                        subscription = %self.subscription,
                        error = %e,
                        backoff_ms = self.retry_backoff.as_millis() as u64,
                        "Broker receive failed; retrying after backoff"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }

        info!(subscription = %self.subscription, "Broker receive loop stopped");
        receiver
    }

    /// Malformed messages are acknowledged without being published; they
    /// can never succeed on redelivery.
    async fn handle_message(&self, receiver: &mut dyn BrokerReceiver, message: BrokerMessage) {
        match PortalEvent::from_broker_body(&message.body) {
            Ok(event) => {
                RelayMetrics::incr(&self.metrics.events_received);
                self.sink.publish(Arc::new(event));
            }
            Err(e) => {
                RelayMetrics::incr(&self.metrics.messages_dropped);
                debug!(
                    subscription = %self.subscription,
                    message_id = %message.id,
                    error = %e,
                    "Dropping malformed broker message"
                );
            }
        }

        if let Err(e) = receiver.complete_message(&message).await {
            warn!(
                subscription = %self.subscription,
                message_id = %message.id,
                error = %e,
                "Failed to acknowledge broker message"
            );
        }
    }
}
