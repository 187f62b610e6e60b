//! # Dispatcher
//!
//! Picks a backend for each new upload in strict round-robin order, streams
//! the payload to it and records the result in the directory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use super::backend::{BackendHandle, UploadStream};
use super::errors::{BackendError, BackendOp, GatewayError, GatewayResult};
use super::run_blocking;
use crate::directory::{BackendLocation, Directory, FileRecord};
use crate::file_storage::UploadMeta;
use crate::observability::MetricsRegistry;

/// Longest accepted original file name, in bytes
pub const MAX_NAME_LEN: usize = 1024;
/// Longest accepted content type, in bytes
pub const MAX_CONTENT_TYPE_LEN: usize = 255;

/// Round-robin upload dispatcher
#[derive(Debug)]
pub struct Dispatcher {
    backends: Vec<BackendHandle>,
    cursor: AtomicUsize,
    directory: Arc<Directory>,
    metrics: Arc<MetricsRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over a fixed, non-empty pool
    pub fn new(
        backends: Vec<BackendHandle>,
        directory: Arc<Directory>,
        metrics: Arc<MetricsRegistry>,
    ) -> GatewayResult<Self> {
        if backends.is_empty() {
            return Err(GatewayError::Validation(
                "at least one backend must be configured".to_string(),
            ));
        }
        Ok(Self {
            backends,
            cursor: AtomicUsize::new(0),
            directory,
            metrics,
        })
    }

    pub fn backends(&self) -> &[BackendHandle] {
        &self.backends
    }

    /// Next backend in the cycle. Every call advances the shared cursor by
    /// exactly one, so concurrent callers get distinct consecutive slots.
    pub fn assign(&self) -> &BackendHandle {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.backends[slot % self.backends.len()]
    }

    /// Stream an upload to the next backend and record it.
    ///
    /// Oversized names are rejected before a backend is assigned. No directory entry exists unless the backend confirmed the store. If
    /// the directory write fails the stored blob is deleted again, best
    /// effort.
    pub async fn upload(
        &self,
        owner_id: &str,
        body: UploadStream,
        original_name: &str,
        content_type: &str,
    ) -> GatewayResult<FileRecord> {
        if original_name.len() > MAX_NAME_LEN {
            return Err(GatewayError::Validation(format!(
                "file name exceeds {} bytes",
                MAX_NAME_LEN
            )));
        }
        if content_type.len() > MAX_CONTENT_TYPE_LEN {
            return Err(GatewayError::Validation(format!(
                "content type exceeds {} bytes",
                MAX_CONTENT_TYPE_LEN
            )));
        }

        let handle = self.assign();
        self.metrics.record_assignment(handle.index());

        let meta = UploadMeta {
            original_name: original_name.to_string(),
            content_type: content_type.to_string(),
            owner_tag: Some(owner_id.to_string()),
        };

        let stored = match handle.backend().store(body, &meta).await {
            Ok(stored) => stored,
            Err(e) => {
                self.metrics.increment_upload_failures();
                return Err(store_failure(handle, e));
            }
        };

        let record = FileRecord {
            file_id: stored.file_id.clone(),
            owner_id: owner_id.to_string(),
            original_name: if original_name.is_empty() {
                stored.original_name
            } else {
                original_name.to_string()
            },
            location: BackendLocation {
                backend: handle.index(),
                address: handle.address().to_string(),
                backend_file_id: stored.file_id,
            },
            size: stored.size,
            content_type: stored.mimetype,
            created_at: stored.upload_date,
        };

        let to_insert = record.clone();
        if let Err(e) = run_blocking(&self.directory, move |dir| dir.put(to_insert)).await {
            self.metrics.increment_upload_failures();
            error!(
                file_id = %record.file_id,
                backend = handle.index(),
                error = %e,
                "directory write failed, removing stored blob"
            );
            if let Err(cleanup) = handle
                .backend()
                .delete(&record.location.backend_file_id)
                .await
            {
                warn!(
                    file_id = %record.file_id,
                    backend = handle.index(),
                    address = %handle.address(),
                    error = %cleanup,
                    "compensating delete failed, blob is orphaned"
                );
            }
            return Err(e);
        }

        self.metrics.increment_uploads();
        info!(
            file_id = %record.file_id,
            backend = handle.index(),
            size = record.size,
            "file uploaded"
        );
        Ok(record)
    }
}

fn store_failure(handle: &BackendHandle, e: BackendError) -> GatewayError {
    if let BackendError::Rejected { status: 413, message } = &e {
        return GatewayError::PayloadTooLarge(message.clone());
    }
    error!(
        backend = handle.index(),
        address = %handle.address(),
        op = %BackendOp::Store,
        error = %e,
        "backend store failed"
    );
    GatewayError::upstream(handle.index(), handle.address(), BackendOp::Store, e)
}
