//! # HTTP Server Module
//!
//! Axum servers for both sides of the system.
//!
//! # Gateway endpoints
//!
//! - `POST /register`, `POST /login` - Credentials and tokens
//! - `POST /upload`, `GET /files` - Upload and list (bearer token)
//! - `GET /file/:id`, `DELETE /file/:id` - Download and delete (bearer token)
//! - `/health`, `/metrics` - Observability
//!
//! # Storage node endpoints
//!
//! - `POST /store` - Multipart blob upload
//! - `GET|HEAD|DELETE /files/:id` - Blob access (`/file/:id` alias)
//! - `/health`

pub mod auth_routes;
pub mod config;
pub mod errors;
pub mod gateway_routes;
pub mod node_routes;
pub mod observability_routes;
pub mod server;

pub use config::{GatewayConfig, NodeConfig};
pub use errors::{ApiError, ErrorResponse, ServerError};
pub use gateway_routes::{GatewayState, STREAM_CHANNEL_CAPACITY};
pub use node_routes::NodeState;
pub use server::{GatewayServer, NodeServer};
