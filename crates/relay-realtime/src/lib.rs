//! # relay-realtime
//!
//! Realtime event relay for the portal. Provides:
//!
//! - A lazily started broker subscription lease with a receive loop
//! - In-process fan-out of parsed events to registered callbacks
//! - Per-tenant event stream connections with keepalive
//! - Broker adapters for Redis Streams and an in-process broker

pub mod broker;
pub mod connection;
pub mod message;
pub mod metrics;
pub mod multiplexer;
pub mod server;
pub mod subscription;

pub use connection::authenticator::{AuthenticatedStream, StreamAuthenticator};
pub use connection::handle::{ConnectionId, ConnectionState, StreamConnection};
pub use connection::manager::ConnectionManager;
pub use message::frame::StreamFrame;
pub use multiplexer::{EventSink, LocalEventMultiplexer, ObserverRegistry, Subscription};
pub use server::RelayHub;
pub use subscription::manager::{BrokerSubscriptionManager, LeaseStatus};
