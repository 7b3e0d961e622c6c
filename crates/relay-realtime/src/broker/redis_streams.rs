//! Redis Streams broker adapter.
//!
//! The topic is a stream at `{key_prefix}{topic}` and each subscription is
//! a consumer group on it. Groups start at `$`, so a new subscription only
//! sees messages added after it was created.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamInfoGroupsReply, StreamReadReply};
use redis::{Client, RedisError};
use tokio::time::Instant;
use tracing::{debug, info};

use relay_core::config::broker::BrokerConfig;
use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;
use relay_core::traits::{BrokerClient, BrokerConnector, BrokerMessage, BrokerReceiver};

use super::naming::random_suffix;

/// Stream entry field holding the message body.
const BODY_FIELD: &str = "body";

/// Opens Redis connections for one topic stream.
#[derive(Debug, Clone)]
pub struct RedisStreamsConnector {
    client: Client,
    stream_key: String,
    instance: String,
    poll_interval: Duration,
}

impl RedisStreamsConnector {
    /// Create a connector from broker configuration.
    ///
    /// Does not connect; the URL is only parsed here.
    pub fn new(config: &BrokerConfig) -> AppResult<Self> {
        let url = config
            .connection_string()
            .ok_or_else(|| AppError::configuration("Broker connection string is not set"))?;

        let client = Client::open(url).map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Invalid Redis connection string", e)
        })?;

        info!(url = %mask_redis_url(url), "Redis Streams broker configured");
        Ok(Self {
            client,
            stream_key: format!("{}{}", config.key_prefix, config.topic),
            instance: config.instance_identity(),
            poll_interval: config.poll_interval(),
        })
    }

    /// The stream key backing the topic.
    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }
}

#[async_trait]
impl BrokerConnector for RedisStreamsConnector {
    fn provider(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> AppResult<Box<dyn BrokerClient>> {
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| broker_error("Failed to connect to Redis", e))?;

        let consumer = format!("{}-{}", self.instance, random_suffix(8));
        debug!(stream = %self.stream_key, consumer = %consumer, "Redis broker connection opened");

        Ok(Box::new(RedisStreamsClient {
            conn,
            stream_key: self.stream_key.clone(),
            consumer,
            poll_interval: self.poll_interval,
        }))
    }
}

struct RedisStreamsClient {
    conn: ConnectionManager,
    stream_key: String,
    consumer: String,
    poll_interval: Duration,
}

#[async_trait]
impl BrokerClient for RedisStreamsClient {
    async fn subscription_exists(&self, name: &str) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Result<StreamInfoGroupsReply, RedisError> = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(&self.stream_key)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(info) => Ok(info.groups.iter().any(|group| group.name == name)),
            Err(e) if is_missing_key(&e.to_string()) => Ok(false),
            Err(e) => Err(broker_error("XINFO GROUPS failed", e)),
        }
    }

    async fn create_subscription(&self, name: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(name)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_busy_group(&e.to_string()) => Err(AppError::conflict(format!(
                "consumer group '{name}' already exists"
            ))),
            Err(e) => Err(broker_error("XGROUP CREATE failed", e)),
        }
    }

    async fn delete_subscription(&self, name: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let result: Result<i64, RedisError> = redis::cmd("XGROUP")
            .arg("DESTROY")
            .arg(&self.stream_key)
            .arg(name)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_missing_key(&e.to_string()) => Ok(()),
            Err(e) => Err(broker_error("XGROUP DESTROY failed", e)),
        }
    }

    async fn create_receiver(&self, subscription: &str) -> AppResult<Box<dyn BrokerReceiver>> {
        Ok(Box::new(RedisStreamsReceiver {
            conn: self.conn.clone(),
            stream_key: self.stream_key.clone(),
            group: subscription.to_string(),
            consumer: self.consumer.clone(),
            poll_interval: self.poll_interval,
        }))
    }

    async fn close(&self) -> AppResult<()> {
        debug!(consumer = %self.consumer, "Redis broker connection released");
        Ok(())
    }
}

/// Reads a consumer group by polling `XREADGROUP` without `BLOCK`, so a
/// read never outlives the connection's response timeout.
struct RedisStreamsReceiver {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    consumer: String,
    poll_interval: Duration,
}

#[async_trait]
impl BrokerReceiver for RedisStreamsReceiver {
    async fn receive_messages(
        &mut self,
        max_messages: usize,
        max_wait: Duration,
    ) -> AppResult<Vec<BrokerMessage>> {
        let deadline = Instant::now() + max_wait;
        loop {
            let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.group)
                .arg(&self.consumer)
                .arg("COUNT")
                .arg(max_messages.max(1))
                .arg("STREAMS")
                .arg(&self.stream_key)
                .arg(">")
                .query_async(&mut self.conn)
                .await
                .map_err(|e| broker_error("XREADGROUP failed", e))?;

            let messages: Vec<BrokerMessage> = reply
                .map(|reply| {
                    reply
                        .keys
                        .into_iter()
                        .flat_map(|key| key.ids)
                        .map(to_broker_message)
                        .collect()
                })
                .unwrap_or_default();

            let now = Instant::now();
            if !messages.is_empty() || now >= deadline {
                return Ok(messages);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn complete_message(&mut self, message: &BrokerMessage) -> AppResult<()> {
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&message.id)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| broker_error("XACK failed", e))?;
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// An entry without a body field becomes an empty body, which the relay
/// then drops as malformed.
fn to_broker_message(entry: StreamId) -> BrokerMessage {
    let body: Vec<u8> = entry.get(BODY_FIELD).unwrap_or_default();
    BrokerMessage::new(entry.id, body)
}

fn broker_error(context: &str, e: RedisError) -> AppError {
    AppError::with_source(ErrorKind::Broker, format!("{context}: {e}"), e)
}

fn is_busy_group(message: &str) -> bool {
    message.contains("BUSYGROUP")
}

fn is_missing_key(message: &str) -> bool {
    message.contains("no such key") || message.contains("NOGROUP")
}

/// Mask password in Redis URL for safe logging.
fn mask_redis_url(url: &str) -> String {
    let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
    // `get` is `None` when an `@` precedes the scheme separator.
    if let Some(at_pos) = url.rfind('@')
        && let Some(userinfo) = url.get(scheme_end..at_pos)
        && let Some(colon_pos) = userinfo.find(':')
    {
        let colon_pos = scheme_end + colon_pos;
        return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
    }
    url.to_string()
}
