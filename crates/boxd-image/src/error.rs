//! Error types for the image layer.

use thiserror::Error;

/// Result type alias for image operations.
pub type Result<T> = std::result::Result<T, ImageError>;

/// Errors that can occur in image operations.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Malformed image source in a create request.
    #[error("bad image source: {0}")]
    BadSource(String),

    /// Unrecognized compression magic.
    #[error("unknown compression: {0}")]
    UnknownCompression(String),

    /// `tar` extraction failed.
    #[error("extraction failed: {0}")]
    Extract(String),

    /// Ownership shifting failed.
    #[error("rootfs shift failed: {0}")]
    Shift(String),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] boxd_store::StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
