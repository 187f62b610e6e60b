//! # Proxy
//!
//! Resolves existing files to the backend recorded for them and forwards
//! reads and deletes there, enforcing ownership on the way.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::backend::{BackendHandle, BlobStream};
use super::errors::{BackendError, BackendOp, GatewayError, GatewayResult};
use super::run_blocking;
use crate::directory::{Directory, DirectoryError, FileRecord};
use crate::observability::MetricsRegistry;

/// A download in progress: the directory record plus the backend's body
pub struct Download {
    pub record: FileRecord,
    pub content_length: Option<u64>,
    pub body: BlobStream,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("record", &self.record)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Outcome of a reconciliation pass
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub checked: usize,
    pub missing: Vec<ReconcileEntry>,
    pub unreachable: Vec<ReconcileEntry>,
    pub removed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileEntry {
    pub file_id: String,
    pub backend: usize,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Read/delete proxy over the recorded backends
#[derive(Debug)]
pub struct Proxy {
    backends: Vec<BackendHandle>,
    directory: Arc<Directory>,
    metrics: Arc<MetricsRegistry>,
}

impl Proxy {
    pub fn new(
        backends: Vec<BackendHandle>,
        directory: Arc<Directory>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            backends,
            directory,
            metrics,
        }
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Look up a record the caller owns. Unknown and foreign ids look the same.
    fn owned(&self, owner_id: &str, file_id: &str) -> GatewayResult<FileRecord> {
        match self.directory.get_owned(owner_id, file_id) {
            Some(record) => Ok(record),
            None => {
                debug!(file_id = %file_id, owner_id = %owner_id, "no owned record");
                self.metrics.increment_not_found();
                Err(GatewayError::NotFound)
            }
        }
    }

    /// Backend currently configured at the record's address
    fn resolve(&self, record: &FileRecord, op: BackendOp) -> GatewayResult<&BackendHandle> {
        self.backends
            .iter()
            .find(|h| h.address() == record.location.address)
            .ok_or_else(|| {
                error!(
                    file_id = %record.file_id,
                    address = %record.location.address,
                    "record points at a backend outside the configured pool"
                );
                GatewayError::upstream(
                    record.location.backend,
                    &record.location.address,
                    op,
                    BackendError::NotConfigured,
                )
            })
    }

    /// Open the blob on its backend. The body is streamed, never buffered.
    pub async fn download(&self, owner_id: &str, file_id: &str) -> GatewayResult<Download> {
        let record = self.owned(owner_id, file_id)?;
        let handle = self.resolve(&record, BackendOp::Retrieve)?;

        match handle
            .backend()
            .retrieve(&record.location.backend_file_id)
            .await
        {
            Ok(blob) => {
                self.metrics.increment_downloads();
                Ok(Download {
                    record,
                    content_length: blob.content_length,
                    body: blob.body,
                })
            }
            Err(BackendError::NotFound) => {
                warn!(
                    file_id = %file_id,
                    backend = handle.index(),
                    "blob missing on backend, record kept for reconciliation"
                );
                self.metrics.increment_not_found();
                Err(GatewayError::NotFound)
            }
            Err(e) => Err(upstream(handle, &record, BackendOp::Retrieve, e)),
        }
    }

    /// Delete on the backend first; the record goes only once the blob is
    /// confirmed gone. A blob the backend no longer has counts as gone.
    pub async fn delete(&self, owner_id: &str, file_id: &str) -> GatewayResult<FileRecord> {
        let record = self.owned(owner_id, file_id)?;
        let handle = self.resolve(&record, BackendOp::Delete)?;

        match handle
            .backend()
            .delete(&record.location.backend_file_id)
            .await
        {
            Ok(()) => {}
            Err(BackendError::NotFound) => {
                warn!(file_id = %file_id, backend = handle.index(), "blob already gone on backend");
            }
            Err(e) => {
                self.metrics.increment_delete_failures();
                return Err(upstream(handle, &record, BackendOp::Delete, e));
            }
        }

        let id = file_id.to_string();
        match run_blocking(&self.directory, move |dir| dir.remove(&id)).await {
            Ok(removed) => {
                self.metrics.increment_deletes();
                info!(file_id = %file_id, backend = handle.index(), "file deleted");
                Ok(removed)
            }
            // A concurrent delete of the same id won the race.
            Err(GatewayError::Directory(DirectoryError::NotFound(_))) => {
                self.metrics.increment_not_found();
                Err(GatewayError::NotFound)
            }
            Err(e) => {
                self.metrics.increment_delete_failures();
                Err(e)
            }
        }
    }

    pub fn list(&self, owner_id: &str) -> Vec<FileRecord> {
        self.directory.list_by_owner(owner_id)
    }

    /// Probe every record's blob. Records whose backend answers "not found"
    /// are reported missing and, with `apply`, removed. Unreachable backends
    /// never cause a removal.
    pub async fn reconcile(&self, apply: bool) -> GatewayResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for record in self.directory.all() {
            report.checked += 1;
            let entry = |reason: Option<String>| ReconcileEntry {
                file_id: record.file_id.clone(),
                backend: record.location.backend,
                address: record.location.address.clone(),
                reason,
            };

            let probe = match self.resolve(&record, BackendOp::Probe) {
                Ok(handle) => handle
                    .backend()
                    .exists(&record.location.backend_file_id)
                    .await,
                Err(_) => Err(BackendError::NotConfigured),
            };

            match probe {
                Ok(true) => {}
                Ok(false) => {
                    warn!(file_id = %record.file_id, backend = record.location.backend, "blob missing");
                    report.missing.push(entry(None));
                    if apply {
                        let id = record.file_id.clone();
                        match run_blocking(&self.directory, move |dir| dir.remove(&id)).await {
                            Ok(_) => report.removed += 1,
                            Err(GatewayError::Directory(DirectoryError::NotFound(_))) => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        file_id = %record.file_id,
                        backend = record.location.backend,
                        error = %e,
                        "backend unreachable during reconciliation"
                    );
                    report.unreachable.push(entry(Some(e.to_string())));
                }
            }
        }

        info!(
            checked = report.checked,
            missing = report.missing.len(),
            unreachable = report.unreachable.len(),
            removed = report.removed,
            "reconciliation finished"
        );
        Ok(report)
    }
}

fn upstream(handle: &BackendHandle, record: &FileRecord, op: BackendOp, e: BackendError) -> GatewayError {
    error!(
        file_id = %record.file_id,
        backend = handle.index(),
        address = %handle.address(),
        op = %op,
        error = %e,
        "backend call failed"
    );
    GatewayError::upstream(handle.index(), handle.address(), op, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryOptions;
    use crate::gateway::testing::{body, collect, memory_pool, MemoryBackend};
    use crate::gateway::Dispatcher;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        backends: Vec<Arc<MemoryBackend>>,
        dispatcher: Dispatcher,
        proxy: Proxy,
    }

    fn fixture(count: usize) -> Fixture {
        let temp = TempDir::new().unwrap();
        let (backends, handles) = memory_pool(count);
        let directory = Arc::new(Directory::open(temp.path(), DirectoryOptions::default()).unwrap());
        let metrics = Arc::new(MetricsRegistry::new(count));
        let dispatcher = Dispatcher::new(handles.clone(), directory.clone(), metrics.clone()).unwrap();
        let proxy = Proxy::new(handles, directory, metrics);
        Fixture {
            _temp: temp,
            backends,
            dispatcher,
            proxy,
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let f = fixture(2);
        let record = f
            .dispatcher
            .upload("u1", body(b"hello world"), "hello.txt", "text/plain")
            .await
            .unwrap();

        let download = f.proxy.download("u1", &record.file_id).await.unwrap();
        assert_eq!(download.record.content_type, "text/plain");
        assert_eq!(download.record.original_name, "hello.txt");
        assert_eq!(collect(download.body).await, b"hello world");
    }

    #[tokio::test]
    async fn test_foreign_owner_sees_not_found() {
        let f = fixture(2);
        let record = f
            .dispatcher
            .upload("u1", body(b"secret"), "s.txt", "text/plain")
            .await
            .unwrap();

        assert!(matches!(
            f.proxy.download("u2", &record.file_id).await,
            Err(GatewayError::NotFound)
        ));
        assert!(matches!(
            f.proxy.delete("u2", &record.file_id).await,
            Err(GatewayError::NotFound)
        ));
        assert!(f.backends[0].contains(&record.file_id));
        assert_eq!(f.proxy.list("u2").len(), 0);
    }

    #[tokio::test]
    async fn test_delete_then_not_found() {
        let f = fixture(1);
        let record = f
            .dispatcher
            .upload("u1", body(b"x"), "x.txt", "text/plain")
            .await
            .unwrap();

        f.proxy.delete("u1", &record.file_id).await.unwrap();
        assert_eq!(f.backends[0].blob_count(), 0);
        assert!(matches!(
            f.proxy.download("u1", &record.file_id).await,
            Err(GatewayError::NotFound)
        ));
        assert!(matches!(
            f.proxy.delete("u1", &record.file_id).await,
            Err(GatewayError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_failed_backend_delete_keeps_record() {
        let f = fixture(1);
        let record = f
            .dispatcher
            .upload("u1", body(b"x"), "x.txt", "text/plain")
            .await
            .unwrap();
        f.backends[0].fail_delete.store(true, Ordering::SeqCst);

        let result = f.proxy.delete("u1", &record.file_id).await;
        assert!(matches!(result, Err(GatewayError::Upstream { op: BackendOp::Delete, .. })));
        assert!(f.proxy.directory().get(&record.file_id).is_some());

        f.backends[0].fail_delete.store(false, Ordering::SeqCst);
        f.proxy.delete("u1", &record.file_id).await.unwrap();
        assert!(f.proxy.directory().is_empty());
    }

    #[tokio::test]
    async fn test_blob_gone_on_backend_drops_record() {
        let f = fixture(1);
        let record = f
            .dispatcher
            .upload("u1", body(b"x"), "x.txt", "text/plain")
            .await
            .unwrap();
        f.backends[0].forget(&record.file_id);

        f.proxy.delete("u1", &record.file_id).await.unwrap();
        assert!(f.proxy.directory().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_three_backends() {
        let f = fixture(3);
        let mut ids = Vec::new();
        let mut assigned = Vec::new();
        for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
            let record = f
                .dispatcher
                .upload("u1", body(b"content"), name, "text/plain")
                .await
                .unwrap();
            assigned.push(record.location.backend);
            ids.push(record.file_id);
        }
        assert_eq!(assigned, vec![0, 1, 2, 0]);
        assert_eq!(f.proxy.list("u1").len(), 4);
        assert_eq!(f.proxy.list("u2").len(), 0);

        f.proxy.delete("u1", &ids[1]).await.unwrap();
        let mut names: Vec<String> = f
            .proxy
            .list("u1")
            .into_iter()
            .map(|r| r.original_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "c.txt", "d.txt"]);
        assert!(matches!(
            f.proxy.download("u1", &ids[1]).await,
            Err(GatewayError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_reconcile() {
        let f = fixture(2);
        let kept = f
            .dispatcher
            .upload("u1", body(b"a"), "a.txt", "text/plain")
            .await
            .unwrap();
        let lost = f
            .dispatcher
            .upload("u1", body(b"b"), "b.txt", "text/plain")
            .await
            .unwrap();
        f.backends[1].forget(&lost.file_id);

        let report = f.proxy.reconcile(false).await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.removed, 0);
        assert_eq!(f.proxy.directory().len(), 2);

        let report = f.proxy.reconcile(true).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(f.proxy.directory().get(&kept.file_id).is_some());
        assert!(f.proxy.directory().get(&lost.file_id).is_none());
    }

    #[tokio::test]
    async fn test_reconcile_never_removes_on_unreachable() {
        let f = fixture(1);
        f.dispatcher
            .upload("u1", body(b"a"), "a.txt", "text/plain")
            .await
            .unwrap();
        f.backends[0].fail_probe.store(true, Ordering::SeqCst);

        let report = f.proxy.reconcile(true).await.unwrap();
        assert_eq!(report.unreachable.len(), 1);
        assert_eq!(report.removed, 0);
        assert_eq!(f.proxy.directory().len(), 1);
    }
}
