//! # Backend Trait
//!
//! The gateway's view of a storage node. The HTTP client in
//! [`super::http_backend`] is the production implementation; tests plug in
//! in-memory doubles.

use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use super::errors::BackendError;
use crate::file_storage::{SideRecord, UploadMeta};

/// Upload body handed to a backend. Errors abort the backend request.
pub type UploadStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync>>;

/// Download body read back from a backend
pub type BlobStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

/// Blob returned by [`Backend::retrieve`], not yet read
pub struct RetrievedBlob {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: BlobStream,
}

impl Debug for RetrievedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievedBlob")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Store, retrieve and delete blobs on one storage node
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Base address, used as the backend's identity in records
    fn address(&self) -> &str;

    /// Stream a new blob to the node and return its side record
    async fn store(&self, body: UploadStream, meta: &UploadMeta) -> Result<SideRecord, BackendError>;

    async fn retrieve(&self, backend_file_id: &str) -> Result<RetrievedBlob, BackendError>;

    /// Remove a blob. A blob that is already gone reports [`BackendError::NotFound`].
    async fn delete(&self, backend_file_id: &str) -> Result<(), BackendError>;

    async fn exists(&self, backend_file_id: &str) -> Result<bool, BackendError>;
}

/// A configured backend and its position in the pool
#[derive(Debug, Clone)]
pub struct BackendHandle {
    index: usize,
    backend: Arc<dyn Backend>,
}

impl BackendHandle {
    pub fn new(index: usize, backend: Arc<dyn Backend>) -> Self {
        Self { index, backend }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn address(&self) -> &str {
        self.backend.address()
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}
