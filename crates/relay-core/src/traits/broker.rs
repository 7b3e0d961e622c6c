//! Broker capability traits.
//!
//! The subscription manager only talks to the broker through these traits,
//! so the concrete driver is chosen at startup and a fake can stand in
//! during tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::result::AppResult;

/// One message pulled from a subscription.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    /// Broker-assigned id, used for acknowledgement.
    pub id: String,
    /// Raw body.
    pub body: Bytes,
}

impl BrokerMessage {
    /// Create a message.
    pub fn new(id: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

/// Opens connections to a broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync + std::fmt::Debug + 'static {
    /// Short name of the adapter, for logs and health output.
    fn provider(&self) -> &'static str;

    /// Open a new client connection.
    async fn connect(&self) -> AppResult<Box<dyn BrokerClient>>;
}

/// An open broker connection scoped to one topic.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Whether a subscription with this name exists on the topic.
    async fn subscription_exists(&self, name: &str) -> AppResult<bool>;

    /// Create a subscription.
    ///
    /// Returns an error of kind `Conflict` if it already exists.
    async fn create_subscription(&self, name: &str) -> AppResult<()>;

    /// Delete a subscription. Deleting a missing subscription succeeds.
    async fn delete_subscription(&self, name: &str) -> AppResult<()>;

    /// Open a receiver on an existing subscription.
    async fn create_receiver(&self, subscription: &str) -> AppResult<Box<dyn BrokerReceiver>>;

    /// Release the connection.
    async fn close(&self) -> AppResult<()>;
}

/// Pulls and acknowledges messages from one subscription.
#[async_trait]
pub trait BrokerReceiver: Send {
    /// Wait up to `max_wait` for at most `max_messages` messages.
    ///
    /// An empty batch means nothing arrived in time.
    async fn receive_messages(
        &mut self,
        max_messages: usize,
        max_wait: Duration,
    ) -> AppResult<Vec<BrokerMessage>>;

    /// Acknowledge a message so it is not redelivered.
    async fn complete_message(&mut self, message: &BrokerMessage) -> AppResult<()>;

    /// Release the receiver.
    async fn close(&mut self) -> AppResult<()>;
}
