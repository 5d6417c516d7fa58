//! WolfLock Configuration
//!
//! This module provides configuration structures for the leader election
//! record store and the database engine behind it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main WolfLock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfLockConfig {
    /// Election record configuration
    pub lock: LockConfig,

    /// Database connection configuration
    pub database: DatabaseConfig,

    /// Transaction behaviour
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Election record configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Table holding election records
    #[serde(default = "default_table")]
    pub table: String,

    /// Election name (row key)
    pub name: String,

    /// Identity of this process (defaults to `<hostname>_<uuid>`)
    #[serde(default)]
    pub identity: Option<String>,
}

/// Which storage engine holds the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shared MariaDB / MySQL server
    #[default]
    MariaDb,
    /// Local SQLite file (single host)
    Sqlite,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Storage engine
    #[serde(default)]
    pub backend: Backend,

    /// MariaDB host
    #[serde(default)]
    pub host: String,

    /// MariaDB port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    #[serde(default)]
    pub user: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// Database name
    #[serde(default)]
    pub database: Option<String>,

    /// SQLite database file (sqlite backend only)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Transaction behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum retries of an idempotent transaction on transient conflicts
    #[serde(default = "default_max_tx_retries")]
    pub max_tx_retries: u32,

    /// Base backoff between retries in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-operation timeout in milliseconds used by the CLI (0 = none)
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_table() -> String {
    "leader_election".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_pool_size() -> u32 {
    4
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_tx_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_op_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tx_retries: default_max_tx_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Get retry backoff as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WolfLockConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfLockConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.lock.name.is_empty() {
            return Err(crate::Error::Config("lock.name cannot be empty".into()));
        }

        crate::engine::quote_table_name(&self.lock.table)?;

        if matches!(self.lock.identity.as_deref(), Some("")) {
            return Err(crate::Error::Config("lock.identity cannot be empty".into()));
        }

        match self.database.backend {
            Backend::MariaDb if self.database.host.is_empty() => {
                return Err(crate::Error::Config("database.host cannot be empty".into()));
            }
            Backend::Sqlite if self.database.path.is_none() => {
                return Err(crate::Error::Config(
                    "database.path is required for the sqlite backend".into(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Get the configured identity, or generate `<hostname>_<uuid>`
    pub fn identity(&self) -> String {
        match &self.lock.identity {
            Some(id) => id.clone(),
            None => default_identity(),
        }
    }

    /// Get the per-operation timeout, if any
    pub fn op_timeout(&self) -> Option<Duration> {
        match self.engine.op_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Get database connection URL
    pub fn database_url(&self) -> String {
        self.database.url()
    }
}

impl DatabaseConfig {
    /// Get MariaDB connection URL
    pub fn url(&self) -> String {
        match &self.database {
            Some(db) => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, db
            ),
            None => format!(
                "mysql://{}:{}@{}:{}",
                self.user, self.password, self.host, self.port
            ),
        }
    }
}

/// Build a unique process identity from the hostname
pub fn default_identity() -> String {
    let host = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
    format!("{}_{}", host, uuid::Uuid::new_v4())
}

/// Sample configuration written by `wolflock init`
pub fn sample_config(name: &str) -> String {
    format!(
        r#"# WolfLock configuration

[lock]
table = "{table}"
name = "{name}"
# identity = "node-1"

[database]
backend = "mariadb"
host = "localhost"
port = 3306
user = "wolflock"
password = "changeme"
database = "cluster"

[engine]
max_tx_retries = 3
retry_backoff_ms = 50
op_timeout_ms = 10000

[logging]
level = "info"
"#,
        table = default_table(),
        name = name,
    )
}
