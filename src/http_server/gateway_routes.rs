//! Gateway File Routes
//!
//! Client-facing upload, list, download and delete. Bodies stream straight
//! through; the gateway never holds a whole file in memory.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::auth_routes::OwnerId;
use super::errors::ApiError;
use crate::auth::AuthService;
use crate::directory::FileRecord;
use crate::file_storage::DEFAULT_CONTENT_TYPE;
use crate::gateway::{Dispatcher, GatewayError, Proxy, UploadStream};
use crate::observability::MetricsRegistry;

/// Chunks buffered between the client's multipart field and the backend
/// request body.
pub const STREAM_CHANNEL_CAPACITY: usize = 8;

// ==================
// Shared State
// ==================

/// Gateway state shared across handlers
#[derive(Debug)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub proxy: Proxy,
    pub auth: AuthService,
    pub metrics: Arc<MetricsRegistry>,
}

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_id: String,
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
    pub upload_date: String,
}

impl From<FileRecord> for FileSummary {
    fn from(record: FileRecord) -> Self {
        Self {
            file_id: record.file_id,
            original_name: record.original_name,
            size: record.size,
            content_type: record.content_type,
            upload_date: record.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: String,
    pub file_id: String,
}

/// Create file routes
pub fn gateway_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/files", get(list_handler))
        .route("/file/:id", get(download_handler).delete(delete_handler))
}

// ==================
// Handlers
// ==================

async fn upload_handler(
    State(state): State<Arc<GatewayState>>,
    OwnerId(owner_id): OwnerId,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::Validation(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(STREAM_CHANNEL_CAPACITY);
        let body: UploadStream = Box::pin(ReceiverStream::new(rx));

        // Pump the client's field into the backend body. Returns the client
        // side error, if any, so it is not blamed on the backend.
        let pump = async move {
            loop {
                match field.chunk().await {
                    Ok(Some(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return None;
                        }
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        let message = e.to_string();
                        let _ = tx
                            .send(Err(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                message.clone(),
                            )))
                            .await;
                        return Some(message);
                    }
                }
            }
        };

        let (result, client_error) = tokio::join!(
            state
                .dispatcher
                .upload(&owner_id, body, &original_name, &content_type),
            pump
        );

        if let Some(message) = client_error {
            if result.is_err() {
                return Err(GatewayError::Validation(format!("upload interrupted: {}", message)).into());
            }
        }
        let record = result?;
        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                file_id: record.file_id,
            }),
        ));
    }

    Err(GatewayError::Validation("No file uploaded".to_string()).into())
}

async fn list_handler(
    State(state): State<Arc<GatewayState>>,
    OwnerId(owner_id): OwnerId,
) -> Json<Vec<FileSummary>> {
    let files = state
        .proxy
        .list(&owner_id)
        .into_iter()
        .map(FileSummary::from)
        .collect();
    Json(files)
}

async fn download_handler(
    State(state): State<Arc<GatewayState>>,
    OwnerId(owner_id): OwnerId,
    Path(file_id): Path<String>,
) -> Result<(HeaderMap, Body), ApiError> {
    let download = state.proxy.download(&owner_id, &file_id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&download.record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&download.record.original_name),
    );
    if let Some(len) = download.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    Ok((headers, Body::from_stream(download.body)))
}

async fn delete_handler(
    State(state): State<Arc<GatewayState>>,
    OwnerId(owner_id): OwnerId,
    Path(file_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let record = state.proxy.delete(&owner_id, &file_id).await?;
    Ok(Json(DeleteResponse {
        message: "File deleted successfully".to_string(),
        file_id: record.file_id,
    }))
}

/// `attachment; filename="..."` with an ASCII fallback, plus the RFC 5987
/// form when the name is not plain ASCII.
pub fn content_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    let mut value = format!("attachment; filename=\"{}\"", fallback);
    if !name.is_ascii() {
        value.push_str("; filename*=UTF-8''");
        for byte in name.bytes() {
            if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
                value.push(byte as char);
            } else {
                value.push_str(&format!("%{:02X}", byte));
            }
        }
    }

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
