//! # Side Metadata
//!
//! The small record a storage node keeps next to each blob, in
//! `<id>.meta`. It is the node's only knowledge about a file; owners and the
//! gateway directory are unknown here.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StorageResult;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Side record stored alongside a blob and echoed by `POST /store`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideRecord {
    pub file_id: String,
    pub original_name: String,
    pub size: u64,
    pub mimetype: String,
    pub upload_date: DateTime<Utc>,
    pub sha256: String,
    /// Opaque tag supplied by the uploader. Never interpreted by the node.
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub owner_tag: Option<String>,
}

impl SideRecord {
    /// Stand-in used when a blob exists but its side record is missing or
    /// unreadable.
    pub fn fallback(file_id: &str, size: u64) -> Self {
        Self {
            file_id: file_id.to_string(),
            original_name: file_id.to_string(),
            size,
            mimetype: DEFAULT_CONTENT_TYPE.to_string(),
            upload_date: Utc::now(),
            sha256: String::new(),
            owner_tag: None,
        }
    }
}

/// What the uploader tells the node about an incoming blob.
#[derive(Debug, Clone, Default)]
pub struct UploadMeta {
    pub original_name: String,
    pub content_type: String,
    pub owner_tag: Option<String>,
}

impl UploadMeta {
    pub fn new(original_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            content_type: content_type.into(),
            owner_tag: None,
        }
    }
}

pub(crate) async fn read_side_record(path: &Path) -> StorageResult<SideRecord> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        super::errors::StorageError::IoError(format!(
            "invalid side record {}: {}",
            path.display(),
            e
        ))
    })
}
