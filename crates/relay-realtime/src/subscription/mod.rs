//! Broker subscription lease management.

pub mod manager;
mod receive_loop;

pub use manager::{BrokerSubscriptionManager, LeaseStatus};
