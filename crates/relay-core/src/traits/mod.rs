//! Capability traits defined in `relay-core` and implemented by adapter crates.

pub mod broker;
pub mod identity;

pub use broker::{BrokerClient, BrokerConnector, BrokerMessage, BrokerReceiver};
pub use identity::{IdentityVerifier, TenantResolver, VerifiedIdentity};
