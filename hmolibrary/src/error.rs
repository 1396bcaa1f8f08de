//! Error types for library operations.

use hmomedia::DatabaseError;

/// Errors reported by the library coordinator and its sources.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    /// A scan is running; mutations are rejected without being enqueued.
    #[error("a library scan is in progress")]
    ScanInProgress,

    /// The source does not own this path; the coordinator tries the next one.
    #[error("path not handled by this library source")]
    PathInvalid,

    /// The source does not implement this operation; treated as a skip.
    #[error("operation not supported by this library source")]
    NotSupported,

    /// The library worker is gone; no further commands are accepted.
    #[error("library is shutting down")]
    Shutdown,

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Generic source failure.
    #[error("library source error: {0}")]
    Source(String),

    /// A record is missing mandatory fields and was rejected.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, LibraryError>;
