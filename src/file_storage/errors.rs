//! # Storage Node Errors

use thiserror::Error;

/// Result type for storage node operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage node errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("File too large (max: {0} bytes)")]
    FileTooLarge(u64),

    #[error("No file received")]
    MissingFile,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upload stream failed: {0}")]
    StreamFailed(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl StorageError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            StorageError::ObjectNotFound(_) => 404,
            StorageError::FileTooLarge(_) => 413,
            StorageError::MissingFile => 400,
            StorageError::InvalidRequest(_) => 400,
            StorageError::StreamFailed(_) => 400,
            StorageError::IoError(_) => 500,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::IoError(e.to_string())
    }
}
