//! Error types for the HTTP API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use boxd_container::ContainerError;
use boxd_image::ImageError;
use boxd_migration::MigrationError;
use boxd_store::StoreError;

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced as typed HTTP responses. Handlers recover nothing
/// locally.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Wrong websocket secret for an existing operation.
    #[error("{0}")]
    Forbidden(String),

    /// Unknown container, snapshot or operation.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate name or pre-existing directory.
    #[error("{0}")]
    Conflict(String),

    /// Store, filesystem, subprocess, runtime or TLS failure.
    #[error("{0}")]
    Internal(String),

    /// Reserved functionality.
    #[error("{0}")]
    NotImplemented(String),
}

impl ApiError {
    /// The HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "type": "error",
            "error": self.to_string(),
            "error_code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyDefined(_) => Self::Conflict(err.to_string()),
            StoreError::NotFound(_) => Self::NotFound(err.to_string()),
            StoreError::BadKey(_) | StoreError::BadDevice(_) => Self::BadRequest(err.to_string()),
            StoreError::StaleAlias(_)
            | StoreError::UnknownImage(_)
            | StoreError::Sqlite(_)
            | StoreError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ContainerError> for ApiError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::NotFound(_) => Self::NotFound(err.to_string()),
            ContainerError::BadConfig(_)
            | ContainerError::BadDevice(_)
            | ContainerError::UnknownAction(_)
            | ContainerError::NotRunning(_)
            | ContainerError::BadSnapshotName(_) => Self::BadRequest(err.to_string()),
            ContainerError::Store(store) => Self::from(store),
            ContainerError::Driver(_) | ContainerError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ImageError> for ApiError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::BadSource(_) => Self::BadRequest(err.to_string()),
            ImageError::UnknownCompression(_)
            | ImageError::Extract(_)
            | ImageError::Shift(_)
            | ImageError::Store(_)
            | ImageError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::BadSecrets(_) => Self::BadRequest(err.to_string()),
            MigrationError::Container(inner) => Self::from(inner),
            MigrationError::Tls(_)
            | MigrationError::Protocol(_)
            | MigrationError::Websocket(_)
            | MigrationError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_error_taxonomy() {
        assert_eq!(
            ApiError::BadRequest(String::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Forbidden(String::new()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Conflict(String::new()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::NotImplemented(String::new()).status_code(),
            StatusCode::NOT_IMPLEMENTED
        );
    }

    #[test]
    fn store_conflicts_map_to_409() {
        let err = ApiError::from(StoreError::AlreadyDefined("web".to_string()));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn whitelist_violations_map_to_400() {
        let err = ApiError::from(StoreError::BadKey("nope".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
