//! Top-level relay hub that ties the subsystems together.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use relay_core::config::broker::BrokerConfig;
use relay_core::config::realtime::RealtimeConfig;
use relay_core::result::AppResult;
use relay_core::traits::broker::BrokerConnector;

use crate::connection::authenticator::AuthenticatedStream;
use crate::connection::handle::{CloseReason, ConnectionId, StreamConnection};
use crate::connection::manager::ConnectionManager;
use crate::message::frame::StreamFrame;
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::multiplexer::{LocalEventMultiplexer, ObserverRegistry};
use crate::subscription::manager::{BrokerSubscriptionManager, LeaseStatus};

/// Point-in-time view of the hub, for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatus {
    /// Broker lease state
    pub lease: LeaseStatus,
    /// Open event streams
    pub connections: usize,
    /// Distinct tenants with an open stream
    pub tenants: usize,
    /// Relay counters
    pub metrics: MetricsSnapshot,
}

/// Central relay that owns the broker lease, the multiplexer and all streams.
#[derive(Clone)]
pub struct RelayHub {
    /// Broker subscription lease.
    pub lease: Arc<BrokerSubscriptionManager>,
    /// Local fan-out.
    pub multiplexer: Arc<LocalEventMultiplexer>,
    /// Stream connections.
    pub connections: Arc<ConnectionManager>,
    /// Metrics collector.
    pub metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RelayHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHub")
            .field("connections", &self.connections.connection_count())
            .field("lease_running", &self.lease.is_running())
            .finish()
    }
}

impl RelayHub {
    /// Creates the hub. With no connector the relay still accepts streams
    /// but never receives events.
    pub fn new(
        broker: BrokerConfig,
        realtime: RealtimeConfig,
        connector: Option<Arc<dyn BrokerConnector>>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(ObserverRegistry::new(metrics.clone()));
        let lease = Arc::new(BrokerSubscriptionManager::new(
            broker,
            connector,
            registry.clone(),
            metrics.clone(),
        ));
        let multiplexer = Arc::new(LocalEventMultiplexer::new(registry, lease.clone()));
        let connections = Arc::new(ConnectionManager::new(
            realtime,
            multiplexer.clone(),
            metrics.clone(),
            shutdown.clone(),
        ));

        info!("Relay hub initialized");

        Self {
            lease,
            multiplexer,
            connections,
            metrics,
            shutdown,
        }
    }

    /// Opens an event stream for an authenticated caller.
    pub async fn open_stream(
        &self,
        auth: &AuthenticatedStream,
    ) -> AppResult<(Arc<StreamConnection>, mpsc::Receiver<StreamFrame>)> {
        self.connections
            .open(auth.tenant_id.clone(), auth.subject.clone())
            .await
    }

    /// Closes an event stream after the client went away.
    pub async fn close_stream(&self, conn_id: &ConnectionId) -> bool {
        self.connections
            .close(conn_id, CloseReason::ClientDisconnected)
            .await
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Current hub status.
    pub async fn status(&self) -> HubStatus {
        HubStatus {
            lease: self.lease.status().await,
            connections: self.connections.connection_count(),
            tenants: self.connections.pool().tenant_count(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Refuses new streams, closes open ones, then stops the broker lease.
    pub async fn shutdown(&self) {
        info!("Shutting down relay hub");

        self.shutdown.cancel();
        let closed = self.connections.close_all().await;
        self.lease.shutdown().await;

        info!(closed_streams = closed, "Relay hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::config::broker::{BrokerProvider, FanOutMode};
    use serde_json::json;

    use super::*;
    use crate::broker::MemoryBroker;

    fn hub(broker: &MemoryBroker) -> RelayHub {
        let config = BrokerConfig {
            provider: BrokerProvider::Memory,
            fan_out: FanOutMode::Replica,
            instance_id: Some("web-1".to_string()),
            max_wait_ms: 20,
            retry_backoff_ms: 10,
            ..BrokerConfig::default()
        };
        RelayHub::new(config, RealtimeConfig::default(), Some(Arc::new(broker.clone())))
    }

    fn auth(tenant: &str) -> AuthenticatedStream {
        AuthenticatedStream {
            tenant_id: tenant.to_string(),
            email: format!("{tenant}@example.com"),
            subject: format!("uid-{tenant}"),
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<StreamFrame>) -> Arc<relay_core::events::PortalEvent> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended");
            if let StreamFrame::Event(event) = frame {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_broker_events_reach_matching_streams() {
        let broker = MemoryBroker::new();
        let hub = hub(&broker);

        let (_a, mut rx_a) = hub.open_stream(&auth("a")).await.unwrap();
        let (_b, mut rx_b) = hub.open_stream(&auth("b")).await.unwrap();
        assert!(hub.lease.is_running());
        assert_eq!(hub.lease.start_count(), 1);

        broker
            .publish_json(&json!({"tenantId": "b", "entity": "invoice", "op": "update"}))
            .await;
        broker
            .publish_json(&json!({"tenantId": "a", "entity": "order", "op": "create"}))
            .await;

        assert_eq!(next_event(&mut rx_a).await.entity, "order");
        assert_eq!(next_event(&mut rx_b).await.entity, "invoice");
    }

    #[tokio::test]
    async fn test_last_stream_closing_stops_lease() {
        let broker = MemoryBroker::new();
        let hub = hub(&broker);

        let (a, _rx_a) = hub.open_stream(&auth("a")).await.unwrap();
        let (b, _rx_b) = hub.open_stream(&auth("a")).await.unwrap();

        assert!(hub.close_stream(&a.id).await);
        assert!(hub.lease.is_running());
        assert_eq!(hub.lease.subscriber_count(), 1);

        assert!(hub.close_stream(&b.id).await);
        assert!(!hub.lease.is_running());
        assert_eq!(hub.lease.stop_count(), 1);
        assert!(broker.subscription_names().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams_and_refuses_new_ones() {
        let broker = MemoryBroker::new();
        let hub = hub(&broker);
        let (conn, _rx) = hub.open_stream(&auth("a")).await.unwrap();

        hub.shutdown().await;

        assert!(hub.is_shutting_down());
        assert!(!conn.is_open());
        assert!(!hub.lease.is_running());
        assert!(hub.open_stream(&auth("a")).await.is_err());

        let status = hub.status().await;
        assert_eq!(status.connections, 0);
        assert_eq!(status.metrics.connections_closed, 1);
        assert_eq!(broker.open_connections(), 0);
    }
}
