//! # Gateway Errors

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::directory::DirectoryError;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Operation sent to a backend, named in upstream failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOp {
    Store,
    Retrieve,
    Delete,
    Probe,
}

impl fmt::Display for BackendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendOp::Store => "store",
            BackendOp::Retrieve => "retrieve",
            BackendOp::Delete => "delete",
            BackendOp::Probe => "probe",
        };
        f.write_str(name)
    }
}

/// Failure talking to a single backend
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("blob not found on backend")]
    NotFound,

    #[error("backend answered {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("backend is not in the configured pool")]
    NotConfigured,
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::InvalidResponse(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Errors surfaced by the dispatcher and proxy
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    /// Unknown id or not owned by the caller; the two are indistinguishable.
    #[error("File not found")]
    NotFound,

    #[error("Backend {backend} failed during {op}")]
    Upstream {
        backend: usize,
        address: String,
        op: BackendOp,
        #[source]
        source: BackendError,
    },

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub(crate) fn upstream(backend: usize, address: &str, op: BackendOp, source: BackendError) -> Self {
        GatewayError::Upstream {
            backend,
            address: address.to_string(),
            op,
            source,
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::PayloadTooLarge(_) => 413,
            GatewayError::NotFound => 404,
            GatewayError::Upstream { .. } => 502,
            GatewayError::Directory(_) => 500,
            GatewayError::Internal(_) => 500,
        }
    }
}
