//! # Gateway Core
//!
//! Coordination between clients and the storage node pool:
//!
//! - [`Dispatcher`] places new uploads round-robin
//! - [`Proxy`] forwards reads and deletes to the recorded backend
//! - [`Backend`] abstracts one storage node; [`HttpBackend`] is the client

mod backend;
mod dispatcher;
mod errors;
mod http_backend;
mod proxy;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tracing::error;

pub use backend::{Backend, BackendHandle, BlobStream, RetrievedBlob, UploadStream};
pub use dispatcher::{Dispatcher, MAX_CONTENT_TYPE_LEN, MAX_NAME_LEN};
pub use errors::{BackendError, BackendOp, GatewayError, GatewayResult};
pub use http_backend::{BackendTimeouts, HttpBackend};
pub use proxy::{Download, Proxy, ReconcileEntry, ReconcileReport};

use crate::directory::{Directory, DirectoryResult};

/// Run a directory mutation on the blocking pool; it fsyncs.
pub(crate) async fn run_blocking<T, F>(directory: &Arc<Directory>, op: F) -> GatewayResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Directory) -> DirectoryResult<T> + Send + 'static,
{
    let directory = directory.clone();
    tokio::task::spawn_blocking(move || op(&directory))
        .await
        .map_err(|e| GatewayError::Internal(format!("directory task failed: {}", e)))?
        .map_err(|e| {
            if e.is_fatal() {
                error!(
                    severity = %e.severity(),
                    error = %e,
                    "directory log unusable, writes fail until restart"
                );
            }
            GatewayError::from(e)
        })
}

/// Build HTTP handles for the configured backend addresses, in order
pub fn http_pool(addresses: &[String], timeouts: BackendTimeouts) -> Result<Vec<BackendHandle>, BackendError> {
    let client = timeouts.client()?;
    Ok(addresses
        .iter()
        .enumerate()
        .map(|(index, address)| {
            let backend = HttpBackend::new(address.clone(), client.clone(), timeouts);
            BackendHandle::new(index, Arc::new(backend) as Arc<dyn Backend>)
        })
        .collect())
}
