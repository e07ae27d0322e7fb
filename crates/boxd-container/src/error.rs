//! Error types for the container layer.

use thiserror::Error;

/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors that can occur in container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Container or snapshot not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid config value.
    #[error("bad config: {0}")]
    BadConfig(String),

    /// Device cannot be translated to runtime config.
    #[error("bad device: {0}")]
    BadDevice(String),

    /// Unknown lifecycle action.
    #[error("unknown action {0}")]
    UnknownAction(String),

    /// Operation requires a running container.
    #[error("container {0} is not running")]
    NotRunning(String),

    /// Invalid snapshot name.
    #[error("bad snapshot name: {0}")]
    BadSnapshotName(String),

    /// Low-level driver failure.
    #[error("driver error: {0}")]
    Driver(String),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] boxd_store::StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
