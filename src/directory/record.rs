//! Directory records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a blob physically lives.
///
/// `backend` is the position in the configured pool at upload time and is
/// kept for reporting; resolution goes through `address`, so reordering the
/// pool does not misroute existing files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendLocation {
    pub backend: usize,
    pub address: String,
    pub backend_file_id: String,
}

/// The directory's cross-backend record for one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub file_id: String,
    pub owner_id: String,
    pub original_name: String,
    pub location: BackendLocation,
    pub size: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Whether `owner_id` may act on this record
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}
