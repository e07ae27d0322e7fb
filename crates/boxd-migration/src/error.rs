//! Error types for migration.

use thiserror::Error;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Errors that can occur during migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Missing or malformed channel secrets.
    #[error("bad migration secrets: {0}")]
    BadSecrets(String),

    /// TLS client configuration failure.
    #[error("TLS configuration failed: {0}")]
    Tls(String),

    /// Protocol violation on a channel.
    #[error("migration protocol error: {0}")]
    Protocol(String),

    /// Websocket transport failure.
    #[error("websocket error: {0}")]
    Websocket(String),

    /// Container layer failure.
    #[error("container error: {0}")]
    Container(#[from] boxd_container::ContainerError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
