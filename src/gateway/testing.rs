//! In-memory backend for gateway unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use uuid::Uuid;

use super::backend::{Backend, BackendHandle, RetrievedBlob, UploadStream};
use super::errors::BackendError;
use crate::file_storage::{SideRecord, UploadMeta};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    address: String,
    blobs: Mutex<HashMap<String, (Bytes, SideRecord)>>,
    pub fail_store: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_probe: AtomicBool,
    /// Id handed out by the next successful store instead of a fresh one
    pub next_id: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Self::default()
        }
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(id)
    }

    /// Drop a blob behind the gateway's back
    pub fn forget(&self, id: &str) {
        self.blobs.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn address(&self) -> &str {
        &self.address
    }

    async fn store(&self, mut body: UploadStream, meta: &UploadMeta) -> Result<SideRecord, BackendError> {
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| BackendError::Transport(e.to_string()))?;
            data.extend_from_slice(&chunk);
        }
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected {
                status: 500,
                message: "disk full".into(),
            });
        }

        let id = self
            .next_id
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let record = SideRecord {
            file_id: id.clone(),
            original_name: meta.original_name.clone(),
            size: data.len() as u64,
            mimetype: meta.content_type.clone(),
            upload_date: Utc::now(),
            sha256: String::new(),
            owner_tag: meta.owner_tag.clone(),
        };
        self.blobs
            .lock()
            .unwrap()
            .insert(id, (Bytes::from(data), record.clone()));
        Ok(record)
    }

    async fn retrieve(&self, backend_file_id: &str) -> Result<RetrievedBlob, BackendError> {
        let (data, record) = self
            .blobs
            .lock()
            .unwrap()
            .get(backend_file_id)
            .cloned()
            .ok_or(BackendError::NotFound)?;
        Ok(RetrievedBlob {
            content_type: Some(record.mimetype),
            content_length: Some(data.len() as u64),
            body: Box::pin(futures_util::stream::iter(vec![Ok(data)])),
        })
    }

    async fn delete(&self, backend_file_id: &str) -> Result<(), BackendError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection refused".into()));
        }
        self.blobs
            .lock()
            .unwrap()
            .remove(backend_file_id)
            .map(|_| ())
            .ok_or(BackendError::NotFound)
    }

    async fn exists(&self, backend_file_id: &str) -> Result<bool, BackendError> {
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection refused".into()));
        }
        Ok(self.contains(backend_file_id))
    }
}

/// `count` memory backends plus the handles wrapping them
pub fn memory_pool(count: usize) -> (Vec<Arc<MemoryBackend>>, Vec<BackendHandle>) {
    let backends: Vec<Arc<MemoryBackend>> = (0..count)
        .map(|i| Arc::new(MemoryBackend::new(&format!("mem://backend-{}", i))))
        .collect();
    let handles = backends
        .iter()
        .enumerate()
        .map(|(i, b)| BackendHandle::new(i, b.clone() as Arc<dyn Backend>))
        .collect();
    (backends, handles)
}

pub fn body(data: &'static [u8]) -> UploadStream {
    Box::pin(futures_util::stream::iter(vec![Ok(Bytes::from_static(data))]))
}

pub async fn collect(mut stream: super::backend::BlobStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}
