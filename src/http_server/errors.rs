//! HTTP error mapping
//!
//! Every subsystem error leaves the server as `{ "error", "code" }` JSON with
//! the subsystem's status code. Upstream failures also name the backend and
//! the operation; the underlying cause is only logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::directory::DirectoryError;
use crate::file_storage::StorageError;
use crate::gateway::{BackendError, GatewayError};

/// Error body returned by both services
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            backend: None,
            operation: None,
        }
    }
}

/// Any error a handler can return
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Auth(e) => e.status_code(),
            ApiError::Gateway(e) => e.status_code(),
            ApiError::Storage(e) => e.status_code(),
        }
    }

    fn body(&self) -> ErrorResponse {
        let code = self.status_code();
        match self {
            ApiError::Gateway(GatewayError::Upstream { backend, op, .. }) => ErrorResponse {
                error: self.to_string(),
                code,
                backend: Some(*backend),
                operation: Some(op.to_string()),
            },
            // Internal details stay in the log.
            ApiError::Gateway(GatewayError::Directory(_)) | ApiError::Gateway(GatewayError::Internal(_)) => {
                ErrorResponse::new("Internal server error", code)
            }
            ApiError::Storage(StorageError::IoError(_)) => ErrorResponse::new("Internal server error", code),
            _ => ErrorResponse::new(self.to_string(), code),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code >= 500 {
            error!(error = %self, source = ?std::error::Error::source(&self), "request failed");
        } else if code != 404 {
            warn!(error = %self, "request rejected");
        }

        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body())).into_response()
    }
}

/// Errors starting either service
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("directory: {0}")]
    Directory(#[from] DirectoryError),

    #[error("user store: {0}")]
    Auth(#[from] AuthError),

    #[error("blob store: {0}")]
    Storage(#[from] StorageError),

    #[error("backend pool: {0}")]
    Backend(#[from] BackendError),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
