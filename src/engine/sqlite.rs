//! SQLite Engine
//!
//! Stores election rows in a local SQLite database. Suitable when every
//! contender runs on one host, and for tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{quote_table_name, TableEngine, TxOptions};
use crate::context::Context;
use crate::error::{Error, Result};

/// How long to keep retrying while another connection holds the lock
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause between lock attempts
const BUSY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// SQLite-backed table engine
pub struct SqliteEngine {
    /// Database connection
    conn: Mutex<Connection>,
    /// Total time to wait for a lock held by another connection
    busy_timeout: Duration,
}

impl SqliteEngine {
    /// Create or open a database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection.
    ///
    /// SQLite's own busy handler is disabled: lock waits are polled here so
    /// they stay bounded by the operation context.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::ZERO)?;
        Ok(Self {
            conn: Mutex::new(conn),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Override how long to wait for a lock held by another connection
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Execute raw SQL (maintenance and tests)
    pub async fn execute_raw(&self, sql: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        Ok(conn.execute(sql, [])?)
    }

    /// Run `attempt` on the connection, retrying while the database is
    /// busy until `busy_timeout` runs out or `ctx` is done
    async fn with_conn<T, F>(&self, ctx: &Context, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> Result<T>,
    {
        let mut conn = ctx.run(async { Ok(self.conn.lock().await) }).await?;
        let started = Instant::now();

        loop {
            let busy = match attempt(&mut conn) {
                Err(e) if e.is_retryable() => e,
                other => return other,
            };

            if started.elapsed() >= self.busy_timeout {
                tracing::warn!("Gave up waiting for SQLite lock during {}: {}", what, busy);
                return Err(busy);
            }
            tracing::trace!("SQLite busy during {}, retrying", what);
            ctx.sleep(BUSY_POLL_INTERVAL).await?;
        }
    }
}

#[async_trait]
impl TableEngine for SqliteEngine {
    async fn create_table(&self, ctx: &Context, table: &str) -> Result<()> {
        let sql = format!(
            "CREATE TABLE {} (name TEXT NOT NULL PRIMARY KEY, \
             value TEXT CHECK (value IS NULL OR json_valid(value)))",
            quote_table_name(table)?
        );
        tracing::debug!("Executing: {}", sql);

        self.with_conn(ctx, "create table", |conn| match conn.execute(&sql, []) {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("already exists") => {
                Err(Error::TableExists(table.to_string()))
            }
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn read_value(&self, ctx: &Context, table: &str, name: &str) -> Result<Option<String>> {
        let sql = format!("SELECT value FROM {} WHERE name = ?1", quote_table_name(table)?);

        self.with_conn(ctx, "read", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
            let value: Option<Option<String>> = tx
                .query_row(&sql, params![name], |row| row.get(0))
                .optional()?;
            tx.commit()?;
            Ok(value.flatten())
        })
        .await
    }

    async fn upsert_value(
        &self,
        ctx: &Context,
        table: &str,
        name: &str,
        value: &str,
        _opts: TxOptions,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (name, value) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            quote_table_name(table)?
        );

        self.with_conn(ctx, "upsert", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(&sql, params![name, value])?;

            // Last chance to observe cancellation; dropping `tx` rolls back.
            ctx.err()?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    fn kind(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn file_engine(dir: &Path) -> SqliteEngine {
        let engine = SqliteEngine::open(&dir.join("wolflock.db")).unwrap();
        let ctx = Context::background();
        engine.create_table(&ctx, "leases").await.unwrap();
        engine
            .upsert_value(&ctx, "leases", "scheduler", r#"{"v":1}"#, TxOptions::idempotent())
            .await
            .unwrap();
        engine
    }

    /// Second connection holding the write lock on the same file
    fn hold_write_lock(dir: &Path) -> Connection {
        let other = Connection::open(dir.join("wolflock.db")).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();
        other
    }

    #[tokio::test]
    async fn test_create_table_twice() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let ctx = Context::background();

        engine.create_table(&ctx, "leases").await.unwrap();
        let err = engine.create_table(&ctx, "leases").await.unwrap_err();
        assert!(matches!(err, Error::TableExists(ref t) if t == "leases"));
    }

    #[tokio::test]
    async fn test_read_missing_and_null() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let ctx = Context::background();
        engine.create_table(&ctx, "leases").await.unwrap();

        assert_eq!(engine.read_value(&ctx, "leases", "scheduler").await.unwrap(), None);

        engine
            .execute_raw("INSERT INTO leases (name, value) VALUES ('scheduler', NULL)")
            .await
            .unwrap();
        assert_eq!(engine.read_value(&ctx, "leases", "scheduler").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let ctx = Context::background();
        engine.create_table(&ctx, "leases").await.unwrap();

        engine
            .upsert_value(&ctx, "leases", "scheduler", r#"{"a":1}"#, TxOptions::idempotent())
            .await
            .unwrap();
        engine
            .upsert_value(&ctx, "leases", "scheduler", r#"{"b":2}"#, TxOptions::idempotent())
            .await
            .unwrap();

        assert_eq!(
            engine.read_value(&ctx, "leases", "scheduler").await.unwrap().as_deref(),
            Some(r#"{"b":2}"#)
        );
        assert_eq!(engine.execute_raw("DELETE FROM leases WHERE name = 'other'").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_json() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let ctx = Context::background();
        engine.create_table(&ctx, "leases").await.unwrap();

        let err = engine
            .upsert_value(&ctx, "leases", "scheduler", "not json", TxOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Sqlite(_)));
    }

    #[tokio::test]
    async fn test_names_are_bound_not_interpolated() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let ctx = Context::background();
        engine.create_table(&ctx, "leases").await.unwrap();

        let hostile = r#"x" OR "1"="1"#;
        engine
            .upsert_value(&ctx, "leases", "scheduler", "{}", TxOptions::idempotent())
            .await
            .unwrap();
        assert_eq!(engine.read_value(&ctx, "leases", hostile).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("wolflock.db");
        let ctx = Context::background();

        {
            let engine = SqliteEngine::open(&path).unwrap();
            engine.create_table(&ctx, "leases").await.unwrap();
            engine
                .upsert_value(&ctx, "leases", "scheduler", "{}", TxOptions::idempotent())
                .await
                .unwrap();
        }

        let engine = SqliteEngine::open(&path).unwrap();
        assert_eq!(
            engine.read_value(&ctx, "leases", "scheduler").await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn test_deadline_bounds_wait_for_other_writer() {
        let dir = tempdir().unwrap();
        let engine = file_engine(dir.path()).await;
        let _other = hold_write_lock(dir.path());

        let ctx = Context::background().with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = engine
            .upsert_value(&ctx, "leases", "scheduler", r#"{"v":2}"#, TxOptions::idempotent())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DeadlineExceeded), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait_for_other_writer() {
        let dir = tempdir().unwrap();
        let engine = file_engine(dir.path()).await;
        let _other = hold_write_lock(dir.path());

        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = engine
            .upsert_value(&ctx, "leases", "scheduler", r#"{"v":2}"#, TxOptions::idempotent())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_waits_for_other_writer_to_finish() {
        let dir = tempdir().unwrap();
        let engine = file_engine(dir.path()).await;
        let other = hold_write_lock(dir.path());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            other.execute_batch("COMMIT").unwrap();
        });

        let ctx = Context::background();
        engine
            .upsert_value(&ctx, "leases", "scheduler", r#"{"v":2}"#, TxOptions::idempotent())
            .await
            .unwrap();
        assert_eq!(
            engine.read_value(&ctx, "leases", "scheduler").await.unwrap().as_deref(),
            Some(r#"{"v":2}"#)
        );
    }

    #[tokio::test]
    async fn test_busy_timeout_gives_storage_error() {
        let dir = tempdir().unwrap();
        let engine = file_engine(dir.path())
            .await
            .with_busy_timeout(Duration::from_millis(50));
        let _other = hold_write_lock(dir.path());

        let err = engine
            .upsert_value(&Context::background(), "leases", "scheduler", "{}", TxOptions::idempotent())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancel_while_queued_for_connection() {
        let engine = Arc::new(SqliteEngine::open_in_memory().unwrap());
        let ctx = Context::background();
        engine.create_table(&ctx, "leases").await.unwrap();
        engine
            .upsert_value(&ctx, "leases", "scheduler", r#"{"v":1}"#, TxOptions::idempotent())
            .await
            .unwrap();

        let guard = engine.conn.lock().await;
        let op_ctx = ctx.child();
        let pending = {
            let engine = engine.clone();
            let op_ctx = op_ctx.clone();
            tokio::spawn(async move {
                engine
                    .upsert_value(&op_ctx, "leases", "scheduler", r#"{"v":2}"#, TxOptions::idempotent())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        op_ctx.cancel();
        let err = pending.await.unwrap().unwrap_err();
        drop(guard);

        assert!(err.is_cancellation());
        assert_eq!(
            engine.read_value(&ctx, "leases", "scheduler").await.unwrap().as_deref(),
            Some(r#"{"v":1}"#)
        );
    }

    #[tokio::test]
    async fn test_cancel_after_execute_rolls_back() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let ctx = Context::background();
        engine.create_table(&ctx, "leases").await.unwrap();
        engine
            .upsert_value(&ctx, "leases", "scheduler", r#"{"v":1}"#, TxOptions::idempotent())
            .await
            .unwrap();

        // Cancel from inside the statement, after the row is written but
        // before the transaction commits.
        let op_ctx = ctx.child();
        let canceller = op_ctx.clone();
        engine.conn.lock().await.update_hook(Some(
            move |_: rusqlite::hooks::Action, _: &str, _: &str, _: i64| canceller.cancel(),
        ));

        let err = engine
            .upsert_value(&op_ctx, "leases", "scheduler", r#"{"v":2}"#, TxOptions::idempotent())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled), "got {:?}", err);

        assert_eq!(
            engine.read_value(&ctx, "leases", "scheduler").await.unwrap().as_deref(),
            Some(r#"{"v":1}"#)
        );
    }
}
