//! Error type shared across the persistence core.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the persistence core.
///
/// Connectivity problems (`Pool`, `PoolExhausted`) surface as failed
/// acquisitions and leave the process healthy. Schema failures abort
/// initialisation. Background sweep failures are logged by the collector and
/// never reach callers through this type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection pool misconfiguration or pool-level failure.
    #[error("connection pool error: {0}")]
    Pool(String),
    /// No pooled connection became available within the acquire timeout.
    #[error("connection pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),
    /// Error reported by the backing store.
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
    /// I/O failure, typically while reading schema script sources.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Schema inspection or script lookup failure.
    #[error("schema error: {0}")]
    Schema(String),
    /// Caller-supplied value rejected before reaching the backing store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation not valid for the component's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}
