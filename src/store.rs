//! Record Store
//!
//! Keeps one leader election record per election name as a single row
//! `(name, value)` in a table engine. Reads and writes each run in their
//! own transaction; nothing is cached in process.

use std::sync::Arc;

use crate::context::Context;
use crate::engine::{TableEngine, TxOptions};
use crate::error::{Error, Result};
use crate::record::LeaderElectionRecord;

/// Leader election record store for one election
pub struct RecordStore<E: TableEngine + ?Sized> {
    /// Shared engine handle (owned by whoever wired the driver together)
    engine: Arc<E>,
    /// Table holding election rows
    table: String,
    /// Election name, the row key
    name: String,
    /// Identity of this process
    identity: String,
}

impl<E: TableEngine + ?Sized> RecordStore<E> {
    /// Create a store for `name` in `table`
    pub fn new(
        engine: Arc<E>,
        table: impl Into<String>,
        name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            table: table.into(),
            name: name.into(),
            identity: identity.into(),
        }
    }

    /// Create the election table if it is not there yet.
    ///
    /// The engine's "already exists" answer counts as success.
    pub async fn provision_table(&self, ctx: &Context) -> Result<()> {
        match self.engine.create_table(ctx, &self.table).await {
            Ok(()) => {
                tracing::info!("Created leader election table {} ({})", self.table, self.engine.kind());
                Ok(())
            }
            Err(Error::TableExists(_)) => {
                tracing::debug!("Leader election table {} already exists", self.table);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read the current record together with its raw stored bytes.
    ///
    /// Fails with [`Error::NotFound`] when no record is stored yet and with
    /// [`Error::Decode`] when the stored document is not a valid record.
    pub async fn get(&self, ctx: &Context) -> Result<(LeaderElectionRecord, Vec<u8>)> {
        tracing::trace!("get leader election record {}", self.describe());

        let raw = self
            .engine
            .read_value(ctx, &self.table, &self.name)
            .await?
            .ok_or_else(|| Error::NotFound(self.name.clone()))?
            .into_bytes();

        let record = LeaderElectionRecord::from_json(&self.name, &raw)?;
        Ok((record, raw))
    }

    /// Store the first record. Same upsert as [`RecordStore::update`].
    pub async fn create(&self, ctx: &Context, record: &LeaderElectionRecord) -> Result<()> {
        tracing::debug!("create leader election record {}", self.describe());
        self.upsert(ctx, record).await
    }

    /// Overwrite the record unconditionally
    pub async fn update(&self, ctx: &Context, record: &LeaderElectionRecord) -> Result<()> {
        tracing::debug!("update leader election record {}", self.describe());
        self.upsert(ctx, record).await
    }

    async fn upsert(&self, ctx: &Context, record: &LeaderElectionRecord) -> Result<()> {
        let value = record.to_json()?;
        self.engine
            .upsert_value(ctx, &self.table, &self.name, &value, TxOptions::idempotent())
            .await
    }

    /// Log an election event. Never fails.
    pub fn record_event(&self, event: &str) {
        tracing::info!(
            table = %self.table,
            name = %self.name,
            "leader election event {}: {}",
            self.describe(),
            event
        );
    }

    /// Identity of this process
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// `<table>/<name>`, for diagnostics
    pub fn describe(&self) -> String {
        format!("{}/{}", self.table, self.name)
    }

    /// Table name
    pub fn table(&self) -> &str {
        &self.table
    }
}
