//! Resource Lock
//!
//! The interface an election driver uses to read and write its record,
//! independent of where the record lives.

use async_trait::async_trait;

use crate::context::Context;
use crate::engine::TableEngine;
use crate::error::Result;
use crate::record::LeaderElectionRecord;
use crate::store::RecordStore;

/// Storage for one leader election record
#[async_trait]
pub trait ResourceLock: Send + Sync {
    /// Current record and its raw stored form; `NotFound` if none yet
    async fn get(&self, ctx: &Context) -> Result<(LeaderElectionRecord, Vec<u8>)>;

    /// Store the initial record
    async fn create(&self, ctx: &Context, record: LeaderElectionRecord) -> Result<()>;

    /// Replace the record
    async fn update(&self, ctx: &Context, record: LeaderElectionRecord) -> Result<()>;

    /// Report an election event
    fn record_event(&self, event: &str);

    /// Identity of this contender
    fn identity(&self) -> String;

    /// Lock description for log messages
    fn describe(&self) -> String;
}

#[async_trait]
impl<E: TableEngine + ?Sized> ResourceLock for RecordStore<E> {
    async fn get(&self, ctx: &Context) -> Result<(LeaderElectionRecord, Vec<u8>)> {
        RecordStore::get(self, ctx).await
    }

    async fn create(&self, ctx: &Context, record: LeaderElectionRecord) -> Result<()> {
        RecordStore::create(self, ctx, &record).await
    }

    async fn update(&self, ctx: &Context, record: LeaderElectionRecord) -> Result<()> {
        RecordStore::update(self, ctx, &record).await
    }

    fn record_event(&self, event: &str) {
        RecordStore::record_event(self, event)
    }

    fn identity(&self) -> String {
        RecordStore::identity(self).to_string()
    }

    fn describe(&self) -> String {
        RecordStore::describe(self)
    }
}
