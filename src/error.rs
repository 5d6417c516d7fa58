//! WolfLock Error Types

use thiserror::Error;

/// Result type alias for WolfLock operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfLock error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Record errors
    #[error("Leader election record not found: {0}")]
    NotFound(String),

    #[error("Leader election record {name} is corrupted: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize leader election record: {0}")]
    Encode(#[source] serde_json::Error),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Cancellation
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

/// Coarse error classification exposed to election drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No record stored for the election name
    NotFound,
    /// Stored payload does not parse into a record
    Decode,
    /// Record could not be serialized
    Encode,
    /// The engine failed to execute or commit
    Storage,
    /// The operation context was cancelled or timed out
    Cancelled,
    /// Bad configuration or table name
    Config,
    /// Local I/O failure
    Io,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Decode { .. } => ErrorKind::Decode,
            Error::Encode(_) => ErrorKind::Encode,
            Error::Database(_) | Error::Sqlite(_) | Error::TableExists(_) => ErrorKind::Storage,
            Error::Cancelled | Error::DeadlineExceeded => ErrorKind::Cancelled,
            Error::Config(_) | Error::ConfigParse(_) | Error::InvalidTableName(_) => {
                ErrorKind::Config
            }
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Check if no record exists yet (no current leader)
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if the operation was cancelled or ran out of time
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Check if the caller may retry this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(e) => crate::engine::mariadb::is_transient(e),
            Error::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(Error::NotFound("leases/scheduler".into()).is_not_found());
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert_eq!(
            Error::TableExists("leases".into()).kind(),
            ErrorKind::Storage
        );

        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::Decode { name: "scheduler".into(), source: bad };
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(!err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_sqlite_busy_is_retryable() {
        let err = Error::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_retryable());
    }
}
