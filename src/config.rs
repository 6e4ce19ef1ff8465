//! Configuration Module
//!
//! Handles loading and managing service configuration from environment variables.
//! Components receive the pieces they need through their constructors.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{OrderError, Result};

/// PostgreSQL connection parameters.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub host: String,
    pub port: u16,
    /// Maximum pooled connections
    pub max_pool_size: usize,
}

/// Stream consumer parameters.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Broker addresses (`host:port`)
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    /// Tick interval between fetches
    pub poll_interval: Duration,
    /// Number of independent pipelines to run
    pub consumers: usize,
    /// Extra write attempts before a failed message is committed anyway
    pub write_retries: u32,
}

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub stream: StreamConfig,
    /// Maximum number of orders held in memory
    pub cache_capacity: usize,
    /// HTTP bind address
    pub server_addr: String,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DB_USER`, `DB_PASSWORD`, `DB_NAME`, `DB_HOST`, `DB_PORT`, `DB_POOL_SIZE`
    /// - `KAFKA_BROKER` - comma separated broker list (default: localhost:9092)
    /// - `KAFKA_TOPIC` (default: order-info), `KAFKA_GROUP_ID` (default: OrderToBd)
    /// - `KAFKA_FETCH_WAIT` - seconds between fetches (default: 5)
    /// - `KAFKA_CONSUMERS` - pipeline count (default: 1)
    /// - `WRITE_RETRIES` - retries before committing a failed write (default: 0)
    /// - `CACHE_MAX_ITEMS` - cache capacity (default: 20)
    /// - `SERVER_ADDR` - HTTP bind address (default: 0.0.0.0:5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database: DatabaseConfig {
                user: env_string("DB_USER", defaults.database.user),
                password: env_string("DB_PASSWORD", defaults.database.password),
                dbname: env_string("DB_NAME", defaults.database.dbname),
                host: env_string("DB_HOST", defaults.database.host),
                port: env_parse("DB_PORT", defaults.database.port),
                max_pool_size: env_parse("DB_POOL_SIZE", defaults.database.max_pool_size),
            },
            stream: StreamConfig {
                brokers: env::var("KAFKA_BROKER")
                    .map(|v| split_brokers(&v))
                    .unwrap_or(defaults.stream.brokers),
                topic: env_string("KAFKA_TOPIC", defaults.stream.topic),
                group_id: env_string("KAFKA_GROUP_ID", defaults.stream.group_id),
                poll_interval: Duration::from_secs(env_parse(
                    "KAFKA_FETCH_WAIT",
                    defaults.stream.poll_interval.as_secs(),
                )),
                consumers: env_parse("KAFKA_CONSUMERS", defaults.stream.consumers),
                write_retries: env_parse("WRITE_RETRIES", defaults.stream.write_retries),
            },
            cache_capacity: env_parse("CACHE_MAX_ITEMS", defaults.cache_capacity),
            server_addr: env_string("SERVER_ADDR", defaults.server_addr),
        }
    }

    /// Rejects values the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(invalid("CACHE_MAX_ITEMS must be at least 1"));
        }
        if self.stream.consumers == 0 {
            return Err(invalid("KAFKA_CONSUMERS must be at least 1"));
        }
        if self.stream.poll_interval.is_zero() {
            return Err(invalid("KAFKA_FETCH_WAIT must be at least 1 second"));
        }
        if self.stream.brokers.is_empty() {
            return Err(invalid("KAFKA_BROKER must name at least one broker"));
        }
        if self.stream.topic.is_empty() || self.stream.group_id.is_empty() {
            return Err(invalid("KAFKA_TOPIC and KAFKA_GROUP_ID must not be empty"));
        }
        if self.database.max_pool_size == 0 {
            return Err(invalid("DB_POOL_SIZE must be at least 1"));
        }
        self.socket_addr()?;
        Ok(())
    }

    /// Parses `server_addr`, accepting the `:5000` shorthand.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr = if self.server_addr.starts_with(':') {
            format!("0.0.0.0{}", self.server_addr)
        } else {
            self.server_addr.clone()
        };
        addr.parse()
            .map_err(|_| invalid(&format!("SERVER_ADDR '{}' is not host:port", self.server_addr)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                user: "db_user".to_string(),
                password: "db_pass".to_string(),
                dbname: "order_db".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                max_pool_size: 16,
            },
            stream: StreamConfig {
                brokers: vec!["localhost:9092".to_string()],
                topic: "order-info".to_string(),
                group_id: "OrderToBd".to_string(),
                poll_interval: Duration::from_secs(5),
                consumers: 1,
                write_retries: 0,
            },
            cache_capacity: 20,
            server_addr: "0.0.0.0:5000".to_string(),
        }
    }
}

fn invalid(msg: &str) -> OrderError {
    OrderError::InvalidConfig(msg.to_string())
}

fn env_string(name: &str, default: String) -> String {
    env::var(name).unwrap_or(default)
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Cannot parse {}={:?}, using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn split_brokers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(String::from)
        .collect()
}
