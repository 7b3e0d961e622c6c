//! In-process broker for single-node development and tests.
//!
//! Every subscription gets its own copy of each published message;
//! receivers on the same subscription compete for messages.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, timeout_at};

use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::traits::{BrokerClient, BrokerConnector, BrokerMessage, BrokerReceiver};

/// Pending messages of one subscription.
#[derive(Debug, Default)]
struct SubscriptionQueue {
    messages: Mutex<VecDeque<BrokerMessage>>,
    notify: Notify,
}

/// Operation counters, readable from tests.
#[derive(Debug, Default)]
pub struct MemoryBrokerStats {
    /// Clients opened
    pub connections_opened: AtomicU64,
    /// Clients closed
    pub connections_closed: AtomicU64,
    /// Receivers opened
    pub receivers_opened: AtomicU64,
    /// Receivers closed
    pub receivers_closed: AtomicU64,
    /// Subscriptions created
    pub subscriptions_created: AtomicU64,
    /// Subscriptions deleted
    pub subscriptions_deleted: AtomicU64,
    /// Messages acknowledged
    pub acknowledged: AtomicU64,
}

#[derive(Debug, Default)]
struct MemoryBrokerState {
    subscriptions: DashMap<String, Arc<SubscriptionQueue>>,
    next_id: AtomicU64,
    stats: MemoryBrokerStats,
    fail_receives: AtomicUsize,
    fail_creates: AtomicBool,
}

/// Cloneable handle to an in-process broker topic.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<MemoryBrokerState>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a raw body to every subscription. Returns how many received it.
    pub async fn publish(&self, body: impl Into<Bytes>) -> usize {
        let body = body.into();
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let queues: Vec<Arc<SubscriptionQueue>> = self
            .state
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for queue in &queues {
            queue
                .messages
                .lock()
                .await
                .push_back(BrokerMessage::new(id.clone(), body.clone()));
            queue.notify.notify_waiters();
        }
        queues.len()
    }

    /// Publish a JSON value.
    pub async fn publish_json(&self, value: &serde_json::Value) -> usize {
        self.publish(value.to_string()).await
    }

    /// Create a subscription directly, as an operator would.
    pub fn provision(&self, name: &str) {
        self.state
            .subscriptions
            .entry(name.to_string())
            .or_default();
    }

    /// Names of all existing subscriptions.
    pub fn subscription_names(&self) -> Vec<String> {
        self.state
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Make the next `count` receive calls fail.
    pub fn fail_next_receives(&self, count: usize) {
        self.state.fail_receives.store(count, Ordering::SeqCst);
    }

    /// Make subscription creation fail until reset.
    pub fn fail_creates(&self, fail: bool) {
        self.state.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Operation counters.
    pub fn stats(&self) -> &MemoryBrokerStats {
        &self.state.stats
    }

    /// Messages acknowledged so far.
    pub fn acknowledged(&self) -> u64 {
        self.state.stats.acknowledged.load(Ordering::SeqCst)
    }

    /// Clients currently open.
    pub fn open_connections(&self) -> u64 {
        let stats = &self.state.stats;
        stats.connections_opened.load(Ordering::SeqCst) - stats.connections_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    fn provider(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> AppResult<Box<dyn BrokerClient>> {
        self.state
            .stats
            .connections_opened
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryBrokerClient {
            state: self.state.clone(),
        }))
    }
}

struct MemoryBrokerClient {
    state: Arc<MemoryBrokerState>,
}

#[async_trait]
impl BrokerClient for MemoryBrokerClient {
    async fn subscription_exists(&self, name: &str) -> AppResult<bool> {
        Ok(self.state.subscriptions.contains_key(name))
    }

    async fn create_subscription(&self, name: &str) -> AppResult<()> {
        if self.state.fail_creates.load(Ordering::SeqCst) {
            return Err(AppError::broker("subscription creation is unavailable"));
        }

        match self.state.subscriptions.entry(name.to_string()) {
            Entry::Occupied(_) => {
                Err(AppError::conflict(format!("subscription '{name}' already exists")))
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::default());
                self.state
                    .stats
                    .subscriptions_created
                    .fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn delete_subscription(&self, name: &str) -> AppResult<()> {
        if self.state.subscriptions.remove(name).is_some() {
            self.state
                .stats
                .subscriptions_deleted
                .fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn create_receiver(&self, subscription: &str) -> AppResult<Box<dyn BrokerReceiver>> {
        let queue = self
            .state
            .subscriptions
            .get(subscription)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::broker(format!("subscription '{subscription}' does not exist")))?;

        self.state
            .stats
            .receivers_opened
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryBrokerReceiver {
            state: self.state.clone(),
            queue,
        }))
    }

    async fn close(&self) -> AppResult<()> {
        self.state
            .stats
            .connections_closed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryBrokerReceiver {
    state: Arc<MemoryBrokerState>,
    queue: Arc<SubscriptionQueue>,
}

impl MemoryBrokerReceiver {
    fn take_injected_failure(&self) -> bool {
        self.state
            .fail_receives
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BrokerReceiver for MemoryBrokerReceiver {
    async fn receive_messages(
        &mut self,
        max_messages: usize,
        max_wait: Duration,
    ) -> AppResult<Vec<BrokerMessage>> {
        if self.take_injected_failure() {
            return Err(AppError::broker("injected receive failure"));
        }

        let deadline = Instant::now() + max_wait;
        loop {
            // Registered before checking the queue so a publish in between is not missed.
            let notified = self.queue.notify.notified();
            {
                let mut messages = self.queue.messages.lock().await;
                if !messages.is_empty() {
                    let take = max_messages.max(1).min(messages.len());
                    return Ok(messages.drain(..take).collect());
                }
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn complete_message(&mut self, _message: &BrokerMessage) -> AppResult<()> {
        self.state
            .stats
            .acknowledged
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.state
            .stats
            .receivers_closed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_each_subscription_gets_a_copy() {
        let broker = MemoryBroker::new();
        let client = broker.connect().await.unwrap();
        client.create_subscription("a").await.unwrap();
        client.create_subscription("b").await.unwrap();

        assert_eq!(broker.publish("hello").await, 2);

        let mut a = client.create_receiver("a").await.unwrap();
        let mut b = client.create_receiver("b").await.unwrap();
        let from_a = a.receive_messages(10, Duration::from_millis(10)).await.unwrap();
        let from_b = b.receive_messages(10, Duration::from_millis(10)).await.unwrap();

        assert_eq!(from_a.len(), 1);
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_a[0].body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_a_conflict() {
        let broker = MemoryBroker::new();
        let client = broker.connect().await.unwrap();
        client.create_subscription("a").await.unwrap();

        let err = client.create_subscription("a").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_with_empty_batch() {
        let broker = MemoryBroker::new();
        broker.provision("a");
        let client = broker.connect().await.unwrap();
        let mut receiver = client.create_receiver("a").await.unwrap();

        let batch = receiver
            .receive_messages(25, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let broker = MemoryBroker::new();
        broker.provision("a");
        let client = broker.connect().await.unwrap();
        let mut receiver = client.create_receiver("a").await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("late").await;
        });

        let batch = receiver
            .receive_messages(25, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let broker = MemoryBroker::new();
        broker.provision("a");
        broker.fail_next_receives(1);
        let client = broker.connect().await.unwrap();
        let mut receiver = client.create_receiver("a").await.unwrap();

        assert!(receiver.receive_messages(1, Duration::ZERO).await.is_err());
        assert!(receiver.receive_messages(1, Duration::ZERO).await.is_ok());
    }
}
