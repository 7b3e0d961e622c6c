//! Broker adapters and subscription naming.

pub mod memory;
pub mod naming;
pub mod redis_streams;

use std::sync::Arc;

use tracing::{info, warn};

use relay_core::config::broker::{BrokerConfig, BrokerProvider};
use relay_core::result::AppResult;
use relay_core::traits::BrokerConnector;

pub use memory::MemoryBroker;
pub use redis_streams::RedisStreamsConnector;

/// Select the broker adapter named by configuration.
///
/// Returns `None` when the relay is disabled; the subscription manager then
/// treats every start as a no-op.
pub fn connector_from_config(config: &BrokerConfig) -> AppResult<Option<Arc<dyn BrokerConnector>>> {
    if !config.is_enabled() {
        warn!("Broker connection string not configured; event relay disabled");
        return Ok(None);
    }

    let connector: Arc<dyn BrokerConnector> = match config.provider {
        BrokerProvider::Redis => Arc::new(RedisStreamsConnector::new(config)?),
        BrokerProvider::Memory => Arc::new(MemoryBroker::new()),
    };

    info!(
        provider = connector.provider(),
        topic = %config.topic,
        fan_out = ?config.fan_out,
        "Broker adapter selected"
    );
    Ok(Some(connector))
}
