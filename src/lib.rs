//! WolfLock - Leader Election Record Storage
//!
//! Stores the record a leader election algorithm uses to agree on a single
//! leader, one row per election, in a shared MariaDB server (or a local
//! SQLite file).
//!
//! # Architecture
//!
//! The election driver owns all leadership decisions. WolfLock only reads
//! and writes the record: every read and every upsert is a single
//! transaction against the table engine, so concurrent contenders never see
//! a torn or merged record.
//!
//! # Features
//!
//! - Idempotent table provisioning
//! - Transactional point reads with a distinct "no record" result
//! - Transactional upserts, retried by the engine on transient conflicts
//! - Cancellation and deadlines on every operation
//! - Resource-lock interface for election drivers

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod lock;
pub mod record;
pub mod store;

pub use config::WolfLockConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfLockConfig;
    pub use crate::context::Context;
    pub use crate::engine::{MariaDbEngine, SqliteEngine, TableEngine, TxOptions};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::lock::ResourceLock;
    pub use crate::record::LeaderElectionRecord;
    pub use crate::store::RecordStore;
}
