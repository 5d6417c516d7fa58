//! Table Engine Module
//!
//! The transactional table store that holds election rows. Every call runs
//! in its own transaction and addresses a single row by primary key.

pub(crate) mod mariadb;
mod sqlite;

pub use mariadb::MariaDbEngine;
pub use sqlite::SqliteEngine;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{Error, Result};

/// Per-transaction hints passed to the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Re-running the whole transaction yields the same final state, so the
    /// engine may retry it on transient conflicts
    pub idempotent: bool,
}

impl TxOptions {
    pub fn idempotent() -> Self {
        Self { idempotent: true }
    }
}

/// A transactional table store addressed by primary key
#[async_trait]
pub trait TableEngine: Send + Sync {
    /// Create `table` with columns `name` (string primary key) and `value`
    /// (nullable JSON document).
    ///
    /// Returns [`Error::TableExists`] if the engine reports the table is
    /// already there.
    async fn create_table(&self, ctx: &Context, table: &str) -> Result<()>;

    /// Read the `value` column of the row keyed by `name`.
    ///
    /// `None` when no row exists or the stored value is NULL.
    async fn read_value(&self, ctx: &Context, table: &str, name: &str) -> Result<Option<String>>;

    /// Insert or overwrite the row keyed by `name`
    async fn upsert_value(
        &self,
        ctx: &Context,
        table: &str,
        name: &str,
        value: &str,
        opts: TxOptions,
    ) -> Result<()>;

    /// Release connections. The engine must not be used afterwards.
    async fn close(&self) {}

    /// Short engine label for diagnostics
    fn kind(&self) -> &'static str;
}

/// Validate a table name and quote it for interpolation into DDL/DML.
///
/// Table names cannot be bound as parameters, so only plain identifiers
/// (optionally schema-qualified) are accepted.
pub fn quote_table_name(table: &str) -> Result<String> {
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| is_identifier(p)) {
        return Err(Error::InvalidTableName(table.to_string()));
    }

    Ok(parts
        .iter()
        .map(|p| format!("`{}`", p))
        .collect::<Vec<_>>()
        .join("."))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
