//! Error types for the store layer.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with this name already exists.
    #[error("already defined: {0}")]
    AlreadyDefined(String),

    /// Row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Config key rejected by the whitelist.
    #[error("bad config key: {0}")]
    BadKey(String),

    /// Device entry missing its mandatory `type` attribute.
    #[error("bad device: {0}")]
    BadDevice(String),

    /// Alias points at an image row that no longer exists.
    #[error("stale alias: {0}")]
    StaleAlias(String),

    /// No image matches the given fingerprint.
    #[error("unknown image: {0}")]
    UnknownImage(String),

    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
