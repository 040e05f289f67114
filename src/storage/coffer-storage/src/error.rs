//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entry not found.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Entry already exists.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    /// Backend could not be opened or reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A query or write failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Caller supplied an unusable argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stored bytes could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}
