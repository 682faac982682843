//! Database configuration
//!
//! [`DatabaseConfig`] is the single input a command engine is built from.
//! It deserializes from YAML or JSON with camelCase keys:
//!
//! ```yaml
//! driver: postgres
//! host: localhost
//! port: 5432
//! databaseName: orders
//! user: app
//! password: secret
//! maxOpenConnections: 20
//! maxIdleConnections: 4
//! connMaxLifetimeInMinutes: 30
//! ```
//!
//! The embedded engine reads `url` verbatim plus its transaction policy:
//!
//! ```yaml
//! driver: sqlite3
//! url: file:orders.db
//! sqlite3TransactionMode: retry
//! sqlite3TransactionMaxRetry: 10
//! sqlite3TransactionRetryDelayInMillisecond: 50
//! sqlite3TransactionRetryJitterInMillisecond: 25
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::{Error, Result};
use crate::pool::PoolConfig;
use crate::serializer::{RetryPolicy, SerializerConfig};

/// Wrapper for sensitive configuration values
///
/// Prevents accidental logging of secrets while allowing access when needed.
#[derive(Debug, Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Expose the secret value
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the secret is the empty string
    pub fn is_empty(&self) -> bool {
        self.expose_secret().is_empty()
    }
}

impl Default for SensitiveString {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// Supported database drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseDriver {
    /// MySQL / MariaDB
    MySql,
    /// PostgreSQL
    Postgres,
    /// Single-file embedded SQLite
    Sqlite3,
    /// Microsoft SQL Server
    SqlServer,
}

impl DatabaseDriver {
    /// Configuration tag of this driver
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite3 => "sqlite3",
            Self::SqlServer => "sqlserver",
        }
    }
}

impl FromStr for DatabaseDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mysql" => Ok(Self::MySql),
            "postgres" => Ok(Self::Postgres),
            "sqlite3" => Ok(Self::Sqlite3),
            "sqlserver" => Ok(Self::SqlServer),
            other => Err(Error::InvalidDriver {
                driver: other.to_string(),
            }),
        }
    }
}

impl Serialize for DatabaseDriver {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DatabaseDriver {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for DatabaseDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the embedded engine keeps transactional writers apart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqliteTransactionMode {
    /// Retry the whole transaction body with jittered backoff
    Retry,
    /// Hold an exclusive write lock for the whole transaction body
    #[default]
    Mutex,
}

/// Connection and pool configuration for one database
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_retry_policy", skip_on_field_errors = false))]
pub struct DatabaseConfig {
    /// Driver tag
    pub driver: DatabaseDriver,

    /// Server host (network drivers)
    #[serde(default)]
    pub host: String,

    /// Database name (network drivers)
    #[serde(default)]
    pub database_name: String,

    /// Server port (network drivers); zero means unset
    #[serde(default)]
    pub port: u16,

    /// User name
    #[serde(default)]
    pub user: String,

    /// Password
    #[serde(default)]
    pub password: SensitiveString,

    /// Connection URL, used verbatim by the embedded driver
    #[serde(default)]
    pub url: String,

    /// Maximum open connections; zero selects the pool default
    #[serde(default)]
    #[validate(range(max = 10000))]
    pub max_open_connections: u32,

    /// Maximum idle connections kept for reuse; zero selects the pool default
    #[serde(default)]
    pub max_idle_connections: u32,

    /// Maximum connection lifetime in minutes; zero selects the pool default
    #[serde(default)]
    pub conn_max_lifetime_in_minutes: u64,

    /// Embedded-engine transaction strategy
    #[serde(default)]
    pub sqlite3_transaction_mode: SqliteTransactionMode,

    /// Attempts per transaction body under the retry strategy
    #[serde(default)]
    #[validate(range(max = 1000))]
    pub sqlite3_transaction_max_retry: u32,

    /// Base delay between attempts in milliseconds
    #[serde(default)]
    #[validate(range(max = 600000))]
    pub sqlite3_transaction_retry_delay_in_millisecond: u64,

    /// Jitter applied around the base delay in milliseconds
    #[serde(default, alias = "SQLite3TransactionRetryJitterInMillisecond")]
    #[validate(range(max = 600000))]
    pub sqlite3_transaction_retry_jitter_in_millisecond: u64,
}

fn validate_retry_policy(config: &DatabaseConfig) -> std::result::Result<(), ValidationError> {
    if config.driver == DatabaseDriver::Sqlite3
        && config.sqlite3_transaction_mode == SqliteTransactionMode::Retry
        && config.sqlite3_transaction_max_retry == 0
    {
        return Err(ValidationError::new("invalid_retry_policy")
            .with_message("sqlite3TransactionMaxRetry must be at least 1 in retry mode".into()));
    }
    Ok(())
}

impl DatabaseConfig {
    /// Create an empty configuration for a driver
    pub fn new(driver: DatabaseDriver) -> Self {
        Self {
            driver,
            host: String::new(),
            database_name: String::new(),
            port: 0,
            user: String::new(),
            password: SensitiveString::default(),
            url: String::new(),
            max_open_connections: 0,
            max_idle_connections: 0,
            conn_max_lifetime_in_minutes: 0,
            sqlite3_transaction_mode: SqliteTransactionMode::default(),
            sqlite3_transaction_max_retry: 0,
            sqlite3_transaction_retry_delay_in_millisecond: 0,
            sqlite3_transaction_retry_jitter_in_millisecond: 0,
        }
    }

    /// Configuration for the embedded driver at `url`
    pub fn sqlite(url: impl Into<String>) -> Self {
        Self::new(DatabaseDriver::Sqlite3).with_url(url)
    }

    /// Set host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set database name
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    /// Set credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = SensitiveString::new(password);
        self
    }

    /// Set connection URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set maximum open connections
    pub fn with_max_open_connections(mut self, max: u32) -> Self {
        self.max_open_connections = max;
        self
    }

    /// Use the mutex strategy for embedded transactions
    pub fn with_sqlite_mutex(mut self) -> Self {
        self.sqlite3_transaction_mode = SqliteTransactionMode::Mutex;
        self
    }

    /// Use the retry strategy for embedded transactions
    pub fn with_sqlite_retry(mut self, max_retry: u32, delay_ms: u64, jitter_ms: u64) -> Self {
        self.sqlite3_transaction_mode = SqliteTransactionMode::Retry;
        self.sqlite3_transaction_max_retry = max_retry;
        self.sqlite3_transaction_retry_delay_in_millisecond = delay_ms;
        self.sqlite3_transaction_retry_jitter_in_millisecond = jitter_ms;
        self
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| Error::config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content)
    }

    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Run field validation, mapping failures to a configuration error
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|e| Error::config(e.to_string()))
    }

    /// Pool settings derived from this configuration
    pub fn pool_config(&self, target: impl Into<String>) -> PoolConfig {
        let mut pool = PoolConfig::new(target);
        if self.max_open_connections > 0 {
            pool.max_size = self.max_open_connections as usize;
        }
        if self.max_idle_connections > 0 {
            pool.max_idle = self.max_idle_connections as usize;
        }
        if self.conn_max_lifetime_in_minutes > 0 {
            pool.max_lifetime = Duration::from_secs(self.conn_max_lifetime_in_minutes * 60);
        }
        pool.max_idle = pool.max_idle.min(pool.max_size);
        pool
    }

    /// Embedded-engine transaction strategy derived from this configuration
    pub fn serializer_config(&self) -> SerializerConfig {
        match self.sqlite3_transaction_mode {
            SqliteTransactionMode::Mutex => SerializerConfig::Mutex,
            SqliteTransactionMode::Retry => SerializerConfig::Retry(RetryPolicy::new(
                self.sqlite3_transaction_max_retry,
                Duration::from_millis(self.sqlite3_transaction_retry_delay_in_millisecond),
                Duration::from_millis(self.sqlite3_transaction_retry_jitter_in_millisecond),
            )),
        }
    }
}
