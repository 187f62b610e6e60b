//! Storage Node Routes
//!
//! The internal blob surface the gateway talks to. `/files/:id` is the
//! canonical path; `/file/:id` is accepted as an alias for reads and
//! deletes.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tokio_util::io::ReaderStream;

use super::errors::ApiError;
use super::gateway_routes::content_disposition;
use crate::file_storage::{BlobStore, SideRecord, StorageError, UploadMeta, DEFAULT_CONTENT_TYPE};

/// Storage node state shared across handlers
#[derive(Debug)]
pub struct NodeState {
    pub store: BlobStore,
}

/// Create blob routes
pub fn node_routes() -> Router<Arc<NodeState>> {
    Router::new()
        .route("/store", post(store_handler))
        .route(
            "/files/:id",
            get(retrieve_handler).head(probe_handler).delete(delete_handler),
        )
        .route("/file/:id", get(retrieve_handler).delete(delete_handler))
}

async fn store_handler(
    State(state): State<Arc<NodeState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SideRecord>), ApiError> {
    let mut meta = UploadMeta::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| StorageError::InvalidRequest(e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                if meta.original_name.is_empty() {
                    meta.original_name = field.file_name().unwrap_or_default().to_string();
                }
                if meta.content_type.is_empty() {
                    meta.content_type = field
                        .content_type()
                        .unwrap_or(DEFAULT_CONTENT_TYPE)
                        .to_string();
                }
                let record = state.store.store(field, meta).await?;
                return Ok((StatusCode::CREATED, Json(record)));
            }
            Some("originalName") => meta.original_name = text(field).await?,
            Some("contentType") => meta.content_type = text(field).await?,
            Some("userId") => meta.owner_tag = Some(text(field).await?),
            _ => {}
        }
    }

    Err(StorageError::MissingFile.into())
}

async fn text(field: axum::extract::multipart::Field<'_>) -> Result<String, StorageError> {
    field
        .text()
        .await
        .map_err(|e| StorageError::InvalidRequest(e.to_string()))
}

async fn retrieve_handler(
    State(state): State<Arc<NodeState>>,
    Path(id): Path<String>,
) -> Result<(HeaderMap, Body), ApiError> {
    let blob = state.store.open_blob(&id).await?;
    let len = blob.file.metadata().await.map_err(StorageError::from)?.len();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&blob.record.mimetype)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&blob.record.original_name),
    );

    Ok((headers, Body::from_stream(ReaderStream::new(blob.file))))
}

async fn probe_handler(
    State(state): State<Arc<NodeState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store.exists(&id).await? {
        Ok(StatusCode::OK)
    } else {
        Err(StorageError::ObjectNotFound(id).into())
    }
}

async fn delete_handler(
    State(state): State<Arc<NodeState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
