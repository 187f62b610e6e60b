//! # Storage Node Blob Store
//!
//! Flat blob storage for a single storage node. The node knows nothing about
//! owners; it stores bytes under ids it generates and hands them back.

pub mod errors;
pub mod local;
pub mod metadata;

pub use errors::{StorageError, StorageResult};
pub use local::{validate_id, BlobStore, OpenBlob};
pub use metadata::{SideRecord, UploadMeta, DEFAULT_CONTENT_TYPE};
