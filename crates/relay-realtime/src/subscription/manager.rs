//! Owner of the broker subscription lease.
//!
//! The lease exists while at least one local subscriber does. The reference
//! count and the lease live behind one async mutex, so a 0→1 or 1→0
//! transition and the start or stop it triggers happen as one step.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use relay_core::config::broker::{BrokerConfig, FanOutMode};
use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::traits::{BrokerClient, BrokerConnector, BrokerReceiver};

use crate::broker::naming::{random_suffix, replica_subscription_name};
use crate::metrics::RelayMetrics;
use crate::multiplexer::EventSink;

use super::receive_loop::ReceiveLoop;

/// A running broker subscription and its receive loop.
struct ActiveLease {
    subscription: String,
    replica: bool,
    client: Box<dyn BrokerClient>,
    cancel: CancellationToken,
    task: JoinHandle<Box<dyn BrokerReceiver>>,
}

#[derive(Default)]
struct Lease {
    ref_count: usize,
    active: Option<ActiveLease>,
    // Set while a background restart is pending after a failed start.
    retry: Option<CancellationToken>,
}

impl Lease {
    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.cancel();
        }
    }
}

/// Point-in-time view of the lease, for health output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseStatus {
    /// Whether a broker is configured.
    pub enabled: bool,
    /// Adapter name, if enabled.
    pub provider: Option<&'static str>,
    /// Fan-out mode.
    pub fan_out: FanOutMode,
    /// Whether the receive loop is running.
    pub running: bool,
    /// Current local subscriber count.
    pub subscriber_count: usize,
    /// Subscription the loop is reading, if running.
    pub subscription: Option<String>,
    /// Completed lease starts.
    pub starts: u64,
    /// Completed lease stops.
    pub stops: u64,
}

/// Starts and stops the broker subscription as local subscribers come and go.
pub struct BrokerSubscriptionManager {
    config: BrokerConfig,
    connector: Option<Arc<dyn BrokerConnector>>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<RelayMetrics>,
    lease: Mutex<Lease>,
    // Mirrors of lease state, readable without waiting on a start or stop.
    subscriber_count: AtomicUsize,
    running: AtomicBool,
    subscription: RwLock<Option<String>>,
    disabled_logged: AtomicBool,
    starts: AtomicU64,
    stops: AtomicU64,
}

impl std::fmt::Debug for BrokerSubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSubscriptionManager")
            .field("topic", &self.config.topic)
            .field("enabled", &self.connector.is_some())
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("subscriber_count", &self.subscriber_count.load(Ordering::SeqCst))
            .finish()
    }
}

impl BrokerSubscriptionManager {
    /// Creates a manager. With no connector the relay is disabled and every
    /// start is a no-op.
    pub fn new(
        config: BrokerConfig,
        connector: Option<Arc<dyn BrokerConnector>>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            config,
            connector,
            sink,
            metrics,
            lease: Mutex::new(Lease::default()),
            subscriber_count: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            subscription: RwLock::new(None),
            disabled_logged: AtomicBool::new(false),
            starts: AtomicU64::new(0),
            stops: AtomicU64::new(0),
        }
    }

    /// Adds a subscriber reference, starting the lease if it is not running.
    ///
    /// A failed start is logged and retried in the background every
    /// `retry_backoff` until it succeeds or the last subscriber leaves.
    pub async fn acquire(self: &Arc<Self>) {
        let mut lease = self.lease.lock().await;
        lease.ref_count += 1;
        self.subscriber_count.store(lease.ref_count, Ordering::SeqCst);

        if lease.active.is_some() {
            return;
        }
        let Some(connector) = self.connector.clone() else {
            if !self.disabled_logged.swap(true, Ordering::SeqCst) {
                warn!(topic = %self.config.topic, "Broker not configured; event relay disabled");
            }
            return;
        };

        match self.start(connector.as_ref()).await {
            Ok(active) => self.activate(&mut lease, active).await,
            Err(e) => {
                error!(topic = %self.config.topic, error = %e, "Failed to start broker subscription");
                self.schedule_retry(&mut lease);
            }
        }
    }

    /// Drops a subscriber reference, stopping the lease when none remain.
    pub async fn release(&self) {
        let mut lease = self.lease.lock().await;
        if lease.ref_count == 0 {
            warn!("Lease released more times than acquired; ignoring");
            return;
        }
        lease.ref_count -= 1;
        self.subscriber_count.store(lease.ref_count, Ordering::SeqCst);

        if lease.ref_count == 0 {
            lease.cancel_retry();
            if let Some(active) = lease.active.take() {
                self.stop(active).await;
            }
        }
    }

    /// Stops the lease regardless of outstanding references.
    ///
    /// Used at process drain after every connection has been closed.
    pub async fn shutdown(&self) {
        let mut lease = self.lease.lock().await;
        if lease.ref_count > 0 {
            warn!(
                subscriber_count = lease.ref_count,
                "Shutting down broker lease with subscribers still registered"
            );
        }
        lease.ref_count = 0;
        self.subscriber_count.store(0, Ordering::SeqCst);
        lease.cancel_retry();
        if let Some(active) = lease.active.take() {
            self.stop(active).await;
        }
    }

    /// Whether the receive loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current subscriber reference count.
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    /// Number of completed starts.
    pub fn start_count(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Number of completed stops.
    pub fn stop_count(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Snapshot of the lease for health output.
    pub async fn status(&self) -> LeaseStatus {
        LeaseStatus {
            enabled: self.connector.is_some(),
            provider: self.connector.as_ref().map(|c| c.provider()),
            fan_out: self.config.fan_out,
            running: self.is_running(),
            subscriber_count: self.subscriber_count(),
            subscription: self.subscription.read().await.clone(),
            starts: self.start_count(),
            stops: self.stop_count(),
        }
    }

    async fn activate(&self, lease: &mut Lease, active: ActiveLease) {
        *self.subscription.write().await = Some(active.subscription.clone());
        self.running.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        lease.active = Some(active);
        lease.cancel_retry();
    }

    /// Spawns the restart loop unless one is already pending.
    fn schedule_retry(self: &Arc<Self>, lease: &mut Lease) {
        if lease.retry.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        lease.retry = Some(cancel.clone());

        let manager: Weak<Self> = Arc::downgrade(self);
        let backoff = self.config.retry_backoff();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if manager.retry_start(&cancel).await {
                    return;
                }
            }
        });
    }

    /// One restart attempt. Returns `true` once no further attempts are needed.
    async fn retry_start(&self, cancel: &CancellationToken) -> bool {
        let mut lease = self.lease.lock().await;
        if cancel.is_cancelled() {
            return true;
        }
        if lease.ref_count == 0 || lease.active.is_some() {
            lease.cancel_retry();
            return true;
        }
        let Some(connector) = self.connector.clone() else {
            lease.cancel_retry();
            return true;
        };

        match self.start(connector.as_ref()).await {
            Ok(active) => {
                info!(topic = %self.config.topic, "Broker subscription lease recovered");
                self.activate(&mut lease, active).await;
                true
            }
            Err(e) => {
                warn!(
                    topic = %self.config.topic,
                    error = %e,
                    backoff_ms = self.config.retry_backoff_ms,
                    "Broker subscription start failed; retrying after backoff"
                );
                false
            }
        }
    }

    async fn start(&self, connector: &dyn BrokerConnector) -> AppResult<ActiveLease> {
        let client = connector.connect().await?;
        let (subscription, replica) = self.resolve_subscription(client.as_ref()).await;

        let receiver = match client.create_receiver(&subscription).await {
            Ok(receiver) => receiver,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!(error = %close_err, "Failed to close broker client after start failure");
                }
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let receive_loop = ReceiveLoop {
            subscription: subscription.clone(),
            sink: self.sink.clone(),
            metrics: self.metrics.clone(),
            batch_size: self.config.receive_batch_size,
            max_wait: self.config.max_wait(),
            retry_backoff: self.config.retry_backoff(),
        };
        let task = tokio::spawn(receive_loop.run(receiver, cancel.clone()));

        info!(
            topic = %self.config.topic,
            subscription = %subscription,
            replica,
            "Broker subscription lease started"
        );

        Ok(ActiveLease {
            subscription,
            replica,
            client,
            cancel,
            task,
        })
    }

    /// Picks the subscription to read. Replica provisioning falls back to
    /// the shared name on any failure.
    async fn resolve_subscription(&self, client: &dyn BrokerClient) -> (String, bool) {
        let shared = self.config.subscription_name.clone();

        if self.config.fan_out == FanOutMode::Replica {
            let name = replica_subscription_name(
                &shared,
                &self.config.instance_identity(),
                &random_suffix(self.config.replica_suffix_len),
                self.config.max_subscription_name_len,
            );
            match ensure_subscription(client, &name).await {
                Ok(()) => return (name, true),
                Err(e) => warn!(
                    subscription = %name,
                    fallback = %shared,
                    error = %e,
                    "Replica subscription provisioning failed; using shared subscription"
                ),
            }
        }

        if let Err(e) = ensure_subscription(client, &shared).await {
            warn!(subscription = %shared, error = %e, "Could not verify shared subscription");
        }
        (shared, false)
    }

    async fn stop(&self, active: ActiveLease) {
        let ActiveLease {
            subscription,
            replica,
            client,
            cancel,
            task,
        } = active;

        cancel.cancel();
        match task.await {
            Ok(mut receiver) => {
                if let Err(e) = receiver.close().await {
                    warn!(subscription = %subscription, error = %e, "Failed to close broker receiver");
                }
            }
            Err(e) => error!(subscription = %subscription, error = %e, "Broker receive loop aborted"),
        }

        if replica && self.config.delete_replica_on_stop {
            if let Err(e) = client.delete_subscription(&subscription).await {
                warn!(subscription = %subscription, error = %e, "Failed to delete replica subscription");
            }
        }

        if let Err(e) = client.close().await {
            warn!(error = %e, "Failed to close broker client");
        }

        self.running.store(false, Ordering::SeqCst);
        *self.subscription.write().await = None;
        self.stops.fetch_add(1, Ordering::SeqCst);
        info!(subscription = %subscription, "Broker subscription lease stopped");
    }
}

/// Check-then-create, tolerating a concurrent create.
async fn ensure_subscription(client: &dyn BrokerClient, name: &str) -> Result<(), AppError> {
    if client.subscription_exists(name).await? {
        return Ok(());
    }
    match client.create_subscription(name).await {
        Err(e) if !e.is_conflict() => Err(e),
        _ => Ok(()),
    }
}
