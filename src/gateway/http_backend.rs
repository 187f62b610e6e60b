//! # HTTP Backend Client
//!
//! Talks to a storage node over its internal HTTP surface:
//!
//! - `POST /store` multipart upload
//! - `GET /files/{id}` streamed download
//! - `DELETE /files/{id}`
//! - `HEAD /files/{id}` existence probe

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};

use super::backend::{Backend, RetrievedBlob, UploadStream};
use super::errors::BackendError;
use crate::file_storage::{SideRecord, UploadMeta};

/// Time bounds applied to every backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTimeouts {
    /// TCP connect
    pub connect: Duration,
    /// Response headers for retrieve, delete and probe
    pub request: Duration,
    /// Whole store call including the streamed body
    pub upload: Duration,
    /// Gap between two chunks of a proxied download
    pub stream_idle: Duration,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(2),
            request: Duration::from_secs(10),
            upload: Duration::from_secs(300),
            stream_idle: Duration::from_secs(30),
        }
    }
}

impl BackendTimeouts {
    /// Build the HTTP client shared by all backends
    pub fn client(&self) -> Result<Client, BackendError> {
        Client::builder()
            .connect_timeout(self.connect)
            .build()
            .map_err(BackendError::from)
    }
}

/// Storage node reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    address: String,
    client: Client,
    timeouts: BackendTimeouts,
}

impl HttpBackend {
    pub fn new(address: impl Into<String>, client: Client, timeouts: BackendTimeouts) -> Self {
        let address = address.into().trim_end_matches('/').to_string();
        Self {
            address,
            client,
            timeouts,
        }
    }

    fn file_url(&self, backend_file_id: &str) -> String {
        format!("{}/files/{}", self.address, backend_file_id)
    }

    async fn bounded<T, F>(&self, limit: Duration, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BackendError::Timeout(limit))?
    }
}

/// Turn a non-success response into a [`BackendError`], keeping a short body
/// excerpt for the logs.
async fn reject(response: Response) -> BackendError {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return BackendError::NotFound;
    }
    let message = response.text().await.unwrap_or_default();
    BackendError::Rejected {
        status: status.as_u16(),
        message: excerpt(message, MAX_ERROR_EXCERPT),
    }
}

const MAX_ERROR_EXCERPT: usize = 512;

/// Cut `text` to at most `max` bytes without splitting a character.
fn excerpt(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[async_trait]
impl Backend for HttpBackend {
    fn address(&self) -> &str {
        &self.address
    }

    async fn store(&self, body: UploadStream, meta: &UploadMeta) -> Result<SideRecord, BackendError> {
        let part = Part::stream(reqwest::Body::wrap_stream(body)).file_name(meta.original_name.clone());

        // Text fields precede the file so the node sees them before the bytes.
        let mut form = Form::new()
            .text("originalName", meta.original_name.clone())
            .text("contentType", meta.content_type.clone());
        if let Some(owner) = &meta.owner_tag {
            form = form.text("userId", owner.clone());
        }
        let form = form.part("file", part);

        let url = format!("{}/store", self.address);
        self.bounded(self.timeouts.upload, async {
            let response = self.client.post(&url).multipart(form).send().await?;
            if !response.status().is_success() {
                return Err(reject(response).await);
            }
            Ok(response.json::<SideRecord>().await?)
        })
        .await
    }

    async fn retrieve(&self, backend_file_id: &str) -> Result<RetrievedBlob, BackendError> {
        let request = self.client.get(self.file_url(backend_file_id));
        let response = self
            .bounded(self.timeouts.request, async { Ok(request.send().await?) })
            .await?;
        if !response.status().is_success() {
            return Err(reject(response).await);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        let idle = self.timeouts.stream_idle;
        let body = tokio_stream::StreamExt::timeout(response.bytes_stream(), idle).map(
            move |item| match item {
                Ok(Ok(chunk)) => Ok(chunk),
                Ok(Err(e)) => Err(BackendError::from(e)),
                Err(_) => Err(BackendError::Timeout(idle)),
            },
        );

        Ok(RetrievedBlob {
            content_type,
            content_length,
            body: Box::pin(body),
        })
    }

    async fn delete(&self, backend_file_id: &str) -> Result<(), BackendError> {
        let request = self.client.delete(self.file_url(backend_file_id));
        let response = self
            .bounded(self.timeouts.request, async { Ok(request.send().await?) })
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(reject(response).await)
        }
    }

    async fn exists(&self, backend_file_id: &str) -> Result<bool, BackendError> {
        let request = self.client.head(self.file_url(backend_file_id));
        let response = self
            .bounded(self.timeouts.request, async { Ok(request.send().await?) })
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(reject(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_normalized() {
        let client = Client::new();
        let backend = HttpBackend::new("http://127.0.0.1:4001/", client, BackendTimeouts::default());
        assert_eq!(backend.address(), "http://127.0.0.1:4001");
        assert_eq!(backend.file_url("abc"), "http://127.0.0.1:4001/files/abc");
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let body = format!("{}é…", "a".repeat(511));
        let cut = excerpt(body, MAX_ERROR_EXCERPT);
        assert_eq!(cut, "a".repeat(511));

        assert_eq!(excerpt("short".to_string(), MAX_ERROR_EXCERPT), "short");
        assert_eq!(excerpt("ééé".to_string(), 4), "éé");
    }

    #[tokio::test]
    async fn test_non_ascii_error_body_is_rejection() {
        use axum::{http::StatusCode as AxumStatus, routing::delete, Router};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let router = Router::new().route(
            "/files/:id",
            delete(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, format!("{}é…", "a".repeat(511))) }),
        );
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let timeouts = BackendTimeouts::default();
        let backend = HttpBackend::new(address, timeouts.client().unwrap(), timeouts);
        match backend.delete("abc").await {
            Err(BackendError::Rejected { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "a".repeat(511));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let timeouts = BackendTimeouts {
            connect: Duration::from_millis(200),
            request: Duration::from_millis(500),
            ..BackendTimeouts::default()
        };
        // Port 9 (discard) is essentially never listening on loopback.
        let backend = HttpBackend::new("http://127.0.0.1:9", timeouts.client().unwrap(), timeouts);
        let result = backend.delete("abc").await;
        assert!(matches!(
            result,
            Err(BackendError::Transport(_)) | Err(BackendError::Timeout(_))
        ));
    }
}
