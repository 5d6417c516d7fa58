//! MariaDB Engine
//!
//! Stores election rows in a shared MariaDB / MySQL server.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use sqlx::mysql::{MySqlDatabaseError, MySqlPoolOptions};
use sqlx::MySqlPool;

use super::{quote_table_name, TableEngine, TxOptions};
use crate::config::{DatabaseConfig, EngineConfig};
use crate::context::Context;
use crate::error::{Error, Result};

/// Table already exists
const ER_TABLE_EXISTS_ERROR: u16 = 1050;
/// Lock wait timeout exceeded
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
/// Deadlock found when trying to get lock
const ER_LOCK_DEADLOCK: u16 = 1213;

/// MariaDB-backed table engine
pub struct MariaDbEngine {
    /// Connection pool (shared; cloning a pool clones the handle)
    pool: MySqlPool,
    /// Retries allowed for idempotent transactions
    max_tx_retries: u32,
    /// Base backoff between retries
    retry_backoff: Duration,
}

impl MariaDbEngine {
    /// Connect a new pool from configuration
    pub async fn connect(config: &DatabaseConfig, engine: &EngineConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url())
            .await?;

        tracing::info!(
            "Connected to MariaDB at {}:{} (pool size {})",
            config.host,
            config.port,
            config.pool_size
        );

        Ok(Self::from_pool(pool).with_retries(engine.max_tx_retries, engine.retry_backoff()))
    }

    /// Use an existing pool owned by the caller
    pub fn from_pool(pool: MySqlPool) -> Self {
        let defaults = EngineConfig::default();
        Self {
            pool,
            max_tx_retries: defaults.max_tx_retries,
            retry_backoff: defaults.retry_backoff(),
        }
    }

    /// Override the retry policy for idempotent transactions
    pub fn with_retries(mut self, max_tx_retries: u32, retry_backoff: Duration) -> Self {
        self.max_tx_retries = max_tx_retries;
        self.retry_backoff = retry_backoff;
        self
    }

    /// Underlying pool
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Run one transaction attempt under `ctx`, re-running idempotent
    /// transactions on transient conflicts
    async fn run_tx<T, F, Fut>(
        &self,
        ctx: &Context,
        opts: TxOptions,
        what: &str,
        mut attempt_tx: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut attempt = 0;
        loop {
            let fut = attempt_tx();
            match ctx.run(async { fut.await.map_err(Error::from) }).await {
                Err(Error::Database(e))
                    if opts.idempotent && attempt < self.max_tx_retries && is_transient(&e) =>
                {
                    attempt += 1;
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        "Transient failure during {} (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        self.max_tx_retries,
                        backoff,
                        e
                    );
                    ctx.sleep(backoff).await?;
                }
                other => return other,
            }
        }
    }

    /// Exponential backoff with jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(10));
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

#[async_trait]
impl TableEngine for MariaDbEngine {
    async fn create_table(&self, ctx: &Context, table: &str) -> Result<()> {
        let sql = create_table_sql(&quote_table_name(table)?);
        tracing::debug!("Executing: {}", sql);

        let result = ctx
            .run(async { sqlx::query(&sql).execute(&self.pool).await.map_err(Error::from) })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(Error::Database(e)) if mysql_error_number(&e) == Some(ER_TABLE_EXISTS_ERROR) => {
                Err(Error::TableExists(table.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn read_value(&self, ctx: &Context, table: &str, name: &str) -> Result<Option<String>> {
        let sql = select_sql(&quote_table_name(table)?);
        let pool = &self.pool;
        let sql = sql.as_str();

        // Read-only, so always idempotent.
        self.run_tx(ctx, TxOptions::idempotent(), "read", move || async move {
            let mut tx = pool.begin().await?;
            let row: Option<(Option<String>,)> = sqlx::query_as(sql)
                .bind(name)
                .fetch_optional(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(row.and_then(|(value,)| value))
        })
        .await
    }

    async fn upsert_value(
        &self,
        ctx: &Context,
        table: &str,
        name: &str,
        value: &str,
        opts: TxOptions,
    ) -> Result<()> {
        let sql = upsert_sql(&quote_table_name(table)?);
        let pool = &self.pool;
        let sql = sql.as_str();

        self.run_tx(ctx, opts, "upsert", move || async move {
            let mut tx = pool.begin().await?;
            sqlx::query(sql)
                .bind(name)
                .bind(value)
                .execute(&mut *tx)
                .await?;
            tx.commit().await
        })
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn kind(&self) -> &'static str {
        "mariadb"
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE {} (name VARCHAR(255) NOT NULL, value JSON NULL, PRIMARY KEY (name))",
        table
    )
}

fn select_sql(table: &str) -> String {
    format!("SELECT CAST(value AS CHAR) FROM {} WHERE name = ?", table)
}

fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {} (name, value) VALUES (?, ?) ON DUPLICATE KEY UPDATE value = VALUES(value)",
        table
    )
}

fn mysql_error_number(e: &sqlx::Error) -> Option<u16> {
    match e {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(|my| my.number()),
        _ => None,
    }
}

/// Check if a failed transaction can be re-run as a whole
pub(crate) fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            matches!(
                mysql_error_number(e),
                Some(ER_LOCK_DEADLOCK) | Some(ER_LOCK_WAIT_TIMEOUT)
            ) || db.code().as_deref() == Some("40001")
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}
