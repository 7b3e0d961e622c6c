//! In-process fan-out of portal events.
//!
//! [`ObserverRegistry`] holds the registered callbacks and is what the
//! receive loop publishes into. [`LocalEventMultiplexer`] pairs it with the
//! subscription manager, so the first subscriber starts the broker lease
//! and the last one to leave stops it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{error, warn};

use relay_core::error::AppError;
use relay_core::events::PortalEvent;
use relay_core::result::AppResult;

use crate::metrics::RelayMetrics;
use crate::subscription::manager::BrokerSubscriptionManager;

/// Callback invoked for every published event.
pub type EventCallback = Arc<dyn Fn(&Arc<PortalEvent>) + Send + Sync>;

/// Destination for parsed events.
pub trait EventSink: Send + Sync + 'static {
    /// Deliver `event` to every current observer. Returns how many ran.
    fn publish(&self, event: Arc<PortalEvent>) -> usize;
}

struct Observer {
    active: AtomicBool,
    callback: EventCallback,
}

/// Registered callbacks, keyed by registration id.
pub struct ObserverRegistry {
    observers: DashMap<u64, Arc<Observer>>,
    next_id: AtomicU64,
    metrics: Arc<RelayMetrics>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ObserverRegistry {
    /// Creates an empty registry.
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self {
            observers: DashMap::new(),
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Registers a callback and returns its id.
    pub fn register(&self, callback: EventCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.insert(
            id,
            Arc::new(Observer {
                active: AtomicBool::new(true),
                callback,
            }),
        );
        id
    }

    /// Removes a callback. Returns `false` if it was already gone.
    pub fn remove(&self, id: u64) -> bool {
        match self.observers.remove(&id) {
            Some((_, observer)) => {
                observer.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl EventSink for ObserverRegistry {
    fn publish(&self, event: Arc<PortalEvent>) -> usize {
        // Snapshot first: callbacks may unsubscribe, which needs the map's write lock.
        let observers: Vec<(u64, Arc<Observer>)> = self
            .observers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (id, observer) in observers {
            if !observer.active.load(Ordering::SeqCst) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (observer.callback)(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    RelayMetrics::incr(&self.metrics.callback_panics);
                    error!(
                        observer_id = id,
                        tenant_id = %event.tenant_id,
                        "Event callback panicked; continuing with remaining observers"
                    );
                }
            }
        }
        delivered
    }
}

/// Registers local subscribers and drives the broker lease's reference count.
#[derive(Debug, Clone)]
pub struct LocalEventMultiplexer {
    registry: Arc<ObserverRegistry>,
    manager: Arc<BrokerSubscriptionManager>,
}

impl LocalEventMultiplexer {
    /// Creates a multiplexer over `registry`, which must be the sink `manager` publishes into.
    pub fn new(registry: Arc<ObserverRegistry>, manager: Arc<BrokerSubscriptionManager>) -> Self {
        Self { registry, manager }
    }

    /// Registers `callback` for every event published from now on.
    ///
    /// Events published before this call are never replayed. Registration
    /// runs on its own task, so a caller dropped mid-await cannot leave the
    /// lease count out of step; the orphaned handle releases itself.
    pub async fn subscribe<F>(&self, callback: F) -> AppResult<Subscription>
    where
        F: Fn(&Arc<PortalEvent>) + Send + Sync + 'static,
    {
        let registry = self.registry.clone();
        let manager = self.manager.clone();

        tokio::spawn(async move {
            let id = registry.register(Arc::new(callback));
            manager.acquire().await;
            Subscription {
                id,
                registry,
                manager,
                released: AtomicBool::new(false),
            }
        })
        .await
        .map_err(|e| AppError::internal(format!("Subscription task failed: {e}")))
    }

    /// Invokes every registered callback with `event`.
    pub fn publish(&self, event: Arc<PortalEvent>) -> usize {
        self.registry.publish(event)
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }
}

/// Handle returned by [`LocalEventMultiplexer::subscribe`].
///
/// Dropping the handle without calling [`Subscription::unsubscribe`]
/// releases it in the background.
pub struct Subscription {
    id: u64,
    registry: Arc<ObserverRegistry>,
    manager: Arc<BrokerSubscriptionManager>,
    released: AtomicBool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

impl Subscription {
    /// Removes the callback and releases its lease reference.
    ///
    /// Only the first call has an effect; it returns `true`.
    pub async fn unsubscribe(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.registry.remove(self.id);

        let manager = self.manager.clone();
        if let Err(e) = tokio::spawn(async move { manager.release().await }).await {
            error!(observer_id = self.id, error = %e, "Lease release task failed");
        }
        true
    }

    /// Whether this handle has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.remove(self.id);

        let manager = self.manager.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { manager.release().await });
            }
            Err(_) => warn!(
                observer_id = self.id,
                "Subscription dropped outside a runtime; lease reference not released"
            ),
        }
    }
}
