//! # Local Blob Store
//!
//! Blobs live flat under the storage root, one file per id, with a `<id>.meta`
//! side record. Uploads are written to `<id>.part` and renamed into place
//! only after the data and side record are on disk, so a blob visible under
//! its final name is always complete.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::{StorageError, StorageResult};
use super::metadata::{read_side_record, SideRecord, UploadMeta, DEFAULT_CONTENT_TYPE};

const PART_SUFFIX: &str = ".part";
const META_SUFFIX: &str = ".meta";
const MAX_ID_LEN: usize = 128;

/// Blob store backing a single storage node
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    max_file_size: u64,
}

/// An open blob ready to stream. The handle stays valid even if the blob is
/// deleted while the download is in flight.
#[derive(Debug)]
pub struct OpenBlob {
    pub file: tokio::fs::File,
    pub record: SideRecord,
}

impl BlobStore {
    /// Open the store, creating the root if needed and sweeping leftovers of
    /// interrupted uploads.
    pub fn open(root: impl Into<PathBuf>, max_file_size: u64) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = Self {
            root,
            max_file_size,
        };
        let swept = store.sweep()?;
        if swept > 0 {
            info!(root = %store.root.display(), swept, "removed stale upload leftovers");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}{}", id, META_SUFFIX))
    }

    fn part_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, PART_SUFFIX))
    }

    /// Remove `.part` files and side records whose blob never got committed.
    fn sweep(&self) -> StorageResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let stale = if name.ends_with(PART_SUFFIX) {
                true
            } else if let Some(id) = name.strip_suffix(META_SUFFIX) {
                !self.blob_path(id).exists()
            } else {
                false
            };
            if stale {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Stream an upload to disk under a freshly generated id.
    ///
    /// Nothing is left behind on failure. The size limit is enforced while
    /// the data is still arriving.
    pub async fn store<S, E>(&self, stream: S, meta: UploadMeta) -> StorageResult<SideRecord>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let id = Uuid::new_v4().simple().to_string();
        let blob_part = self.part_path(&id);
        let meta_part = self.part_path(&format!("{}{}", id, META_SUFFIX));

        match self
            .write_upload(&id, &blob_part, &meta_part, stream, meta)
            .await
        {
            Ok(record) => {
                debug!(file_id = %record.file_id, size = record.size, "blob stored");
                Ok(record)
            }
            Err(e) => {
                for path in [&blob_part, &meta_part, &self.meta_path(&id)] {
                    let _ = tokio::fs::remove_file(path).await;
                }
                Err(e)
            }
        }
    }

    async fn write_upload<S, E>(
        &self,
        id: &str,
        blob_part: &Path,
        meta_part: &Path,
        stream: S,
        meta: UploadMeta,
    ) -> StorageResult<SideRecord>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        futures_util::pin_mut!(stream);

        let mut file = tokio::fs::File::create(blob_part).await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::StreamFailed(e.to_string()))?;
            size += chunk.len() as u64;
            if size > self.max_file_size {
                return Err(StorageError::FileTooLarge(self.max_file_size));
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let original_name = if meta.original_name.is_empty() {
            id.to_string()
        } else {
            meta.original_name
        };
        let mimetype = if meta.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            meta.content_type
        };
        let record = SideRecord {
            file_id: id.to_string(),
            original_name,
            size,
            mimetype,
            upload_date: Utc::now(),
            sha256: format!("{:x}", hasher.finalize()),
            owner_tag: meta.owner_tag,
        };

        let encoded = serde_json::to_vec(&record)
            .map_err(|e| StorageError::IoError(e.to_string()))?;
        let mut meta_file = tokio::fs::File::create(meta_part).await?;
        meta_file.write_all(&encoded).await?;
        meta_file.sync_all().await?;
        drop(meta_file);

        // Side record first; the blob rename is the commit point.
        tokio::fs::rename(meta_part, self.meta_path(id)).await?;
        tokio::fs::rename(blob_part, self.blob_path(id)).await?;
        sync_dir(&self.root).await?;

        Ok(record)
    }

    /// Open a stored blob for streaming.
    pub async fn open_blob(&self, id: &str) -> StorageResult<OpenBlob> {
        validate_id(id)?;
        let file = tokio::fs::File::open(self.blob_path(id))
            .await
            .map_err(|e| not_found_or_io(id, e))?;

        let record = match read_side_record(&self.meta_path(id)).await {
            Ok(record) => record,
            Err(e) => {
                warn!(file_id = %id, error = %e, "side record unavailable, using fallback");
                let size = file.metadata().await?.len();
                SideRecord::fallback(id, size)
            }
        };

        Ok(OpenBlob { file, record })
    }

    pub async fn exists(&self, id: &str) -> StorageResult<bool> {
        validate_id(id)?;
        Ok(tokio::fs::try_exists(self.blob_path(id)).await?)
    }

    /// Delete a blob and its side record. The blob goes first so a crash in
    /// between leaves only an orphan side record, which the startup sweep
    /// removes.
    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        validate_id(id)?;
        tokio::fs::remove_file(self.blob_path(id))
            .await
            .map_err(|e| not_found_or_io(id, e))?;

        match tokio::fs::remove_file(self.meta_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file_id = %id, error = %e, "failed to remove side record"),
        }
        debug!(file_id = %id, "blob deleted");
        Ok(())
    }
}

/// Ids are generated here, so anything outside `[A-Za-z0-9_-]` cannot name a
/// stored blob. Such ids report not found rather than touching the disk.
pub fn validate_id(id: &str) -> StorageResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::ObjectNotFound(id.to_string()))
    }
}

fn not_found_or_io(id: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::ObjectNotFound(id.to_string())
    } else {
        StorageError::IoError(e.to_string())
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> StorageResult<()> {
    let dir = tokio::fs::File::open(dir).await?;
    dir.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> StorageResult<()> {
    Ok(())
}
