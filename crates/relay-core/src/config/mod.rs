//! Application configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! optional TOML files, `RELAY__`-prefixed environment variables, and a
//! small set of legacy environment aliases. Each sub-module represents a
//! logical configuration section.

pub mod app;
pub mod auth;
pub mod broker;
pub mod logging;
pub mod rate_limit;
pub mod realtime;

use serde::{Deserialize, Serialize};

use self::app::ServerConfig;
use self::auth::AuthConfig;
use self::broker::BrokerConfig;
use self::logging::LoggingConfig;
use self::rate_limit::{KNOWN_BUCKETS, RateLimitConfig, RateLimitRule};
use self::realtime::RealtimeConfig;

use crate::error::AppError;

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Credential verification settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Broker subscription settings.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Event stream connection settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Admission control settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Idle connection timeout in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl DatabaseConfig {
    /// Pool settings with defaults for the given URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML files and the process environment.
    ///
    /// Merges `config/default`, the `config/{env}` overlay, variables
    /// prefixed with `RELAY__`, and finally the legacy aliases.
    pub fn load(env: &str) -> Result<Self, AppError> {
        Self::load_with(env, |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::load`] with an injectable alias lookup.
    pub fn load_with<F>(env: &str, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = apply_env_aliases(builder, &lookup)?
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

/// Overlay the short environment names used by existing deployments.
fn apply_env_aliases<F>(builder: Builder, lookup: &F) -> Result<Builder, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let connection = non_empty("SERVICE_BUS_CONN").or_else(|| non_empty("SERVICEBUS_CONNECTION_STRING"));

    let mut builder = builder
        .set_override_option("database.url", non_empty("DATABASE_URL"))?
        .set_override_option("broker.connection_string", connection)?
        .set_override_option("broker.topic", non_empty("SERVICE_BUS_TOPIC_NAME"))?
        .set_override_option(
            "broker.subscription_name",
            non_empty("SERVICE_BUS_SUBSCRIPTION_NAME"),
        )?
        .set_override_option(
            "broker.fan_out",
            non_empty("SERVICE_BUS_FANOUT_MODE").map(|v| v.trim().to_lowercase()),
        )?;

    for bucket in KNOWN_BUCKETS {
        let upper = bucket.to_uppercase();
        let max = parse_u64(&non_empty, &format!("RATE_LIMIT_{upper}_MAX"))?;
        let window = parse_u64(&non_empty, &format!("RATE_LIMIT_{upper}_WINDOW_MS"))?;
        if max.is_none() && window.is_none() {
            continue;
        }

        // Both fields are written so a partial override keeps the builtin for the other.
        let builtin = RateLimitRule::builtin(bucket);
        let max = max.unwrap_or(builtin.max);
        let window = window.unwrap_or(builtin.window_ms);
        builder = builder
            .set_override(format!("rate_limit.buckets.{bucket}.max"), to_i64(max)?)?
            .set_override(format!("rate_limit.buckets.{bucket}.window_ms"), to_i64(window)?)?;
    }

    Ok(builder)
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| AppError::configuration(format!("{key} must be a positive integer: {e}")))
        })
        .transpose()
}

fn to_i64(value: u64) -> Result<i64, AppError> {
    i64::try_from(value).map_err(|_| AppError::configuration(format!("{value} is out of range")))
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    300
}
