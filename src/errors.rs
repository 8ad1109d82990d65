use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::{
    services::{
        auth_service::AuthError, backend_client::BackendError, signature_service::SignatureError,
        upload_service::UploadError, video_service::VideoError,
    },
    storage::StorageError,
};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "authentication required")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(format!("database error: {}", err))
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match err {
            StorageError::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            StorageError::InvalidParts(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StorageError::Presign(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::Other(_) => StatusCode::BAD_GATEWAY,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Storage(e) => e.into(),
            UploadError::Sqlx(e) => e.into(),
            e @ (UploadError::TooSmallForMultipart { .. }
            | UploadError::TooLargeForMultipart { .. }
            | UploadError::InvalidRequest(_)) => AppError::bad_request(e.to_string()),
            e @ (UploadError::PartUploadFailed { .. } | UploadError::ObjectUploadFailed(_)) => {
                AppError::new(StatusCode::BAD_GATEWAY, e.to_string())
            }
            e @ UploadError::CompletionMismatch { .. } => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            e @ UploadError::SessionNotFound(_) => AppError::not_found(e.to_string()),
            e @ UploadError::SessionClosed { .. } => AppError::new(StatusCode::CONFLICT, e.to_string()),
        }
    }
}

impl From<VideoError> for AppError {
    fn from(err: VideoError) -> Self {
        match err {
            VideoError::NotFound(_) => AppError::not_found(err.to_string()),
            VideoError::Invalid(_) => AppError::bad_request(err.to_string()),
            VideoError::Sqlx(e) => e.into(),
        }
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Status { status, message } => AppError::new(status, message),
            BackendError::Http(_) => AppError::new(StatusCode::BAD_GATEWAY, err.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => AppError::unauthorized(),
            AuthError::Forbidden(_) => AppError::new(StatusCode::FORBIDDEN, err.to_string()),
            AuthError::Backend(e) => e.into(),
            AuthError::Sqlx(e) => e.into(),
        }
    }
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::NotConfigured(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            SignatureError::NoDocument(_) => AppError::not_found(err.to_string()),
            SignatureError::Provider { .. } | SignatureError::Http(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            SignatureError::Io(_) => AppError::internal(err.to_string()),
            SignatureError::Video(e) => e.into(),
        }
    }
}
