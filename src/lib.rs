//! # walletdb - Reorg-safe wallet record store
//!
//! Cache-coherent, dialect-portable storage for blockchain-derived facts.
//!
//! walletdb provides:
//! - A pure SQL dialect adapter for SQLite, PostgreSQL and MySQL
//! - A connection provider with a single writer gate and scoped transactions
//! - A coin record store with an in-memory "unspent per wallet" index
//! - Height-threshold rollback across stores for chain reorganizations
//! - Cursor-paginated hint lookups

pub mod bytes;
pub mod coin;
pub mod wallet;
pub mod trade;
pub mod dialect;
pub mod cache;
pub mod storage;
pub mod rollback;
pub mod config;
pub mod output;
pub mod ui;

// Re-exports for convenient access
pub use bytes::Bytes32;
pub use coin::{Coin, CoinRecord};
pub use dialect::Dialect;
pub use rollback::{Rollback, RollbackSummary};
pub use storage::{CoinStore, DbWrapper, HintStore};
pub use wallet::WalletType;

/// Result type alias for walletdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for walletdb operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown dialect tag. Configuration error, never retried.
    #[error("Unsupported SQL dialect: {0}")]
    UnsupportedDialect(String),

    #[error("No driver linked for dialect {0}")]
    DriverUnavailable(Dialect),

    /// I/O or connection failure reported by the engine. Propagated, not retried.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Cache and storage disagree, or a stored row breaks a record invariant.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure is a busy/locked engine that a caller may retry
    /// once it owns the surrounding transaction scope.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
