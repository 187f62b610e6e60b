//! # HTTP Servers
//!
//! The client-facing gateway and the internal storage node, each assembled
//! from its config into an axum router.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, Router};
use chrono::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::auth_routes::auth_routes;
use super::config::{GatewayConfig, NodeConfig, MAX_TOKEN_TTL_SECS};
use super::errors::ServerError;
use super::gateway_routes::{gateway_routes, GatewayState};
use super::node_routes::{node_routes, NodeState};
use super::observability_routes::{health_routes, observability_routes};
use crate::auth::{AuthService, FileUserStore, JwtConfig, JwtManager};
use crate::directory::Directory;
use crate::file_storage::BlobStore;
use crate::gateway::{http_pool, BackendHandle, Dispatcher, Proxy};
use crate::observability::MetricsRegistry;

/// Headroom over `max_file_size` for multipart framing and text fields
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

impl GatewayState {
    /// Open the directory and user store under `data_dir` and wire the
    /// dispatcher and proxy over `backends`.
    pub fn open(config: &GatewayConfig, backends: Vec<BackendHandle>) -> Result<Self, ServerError> {
        let directory = Arc::new(Directory::open(&config.data_dir, config.directory_options())?);
        let metrics = Arc::new(MetricsRegistry::new(backends.len()));

        let users = Arc::new(FileUserStore::open(&config.data_dir)?);
        let jwt = JwtManager::new(JwtConfig {
            secret: config.jwt_secret.clone(),
            access_token_ttl: Duration::seconds(config.token_ttl_secs.min(MAX_TOKEN_TTL_SECS) as i64),
        });

        Ok(Self {
            dispatcher: Dispatcher::new(backends.clone(), directory.clone(), metrics.clone())?,
            proxy: Proxy::new(backends, directory, metrics.clone()),
            auth: AuthService::new(users, jwt),
            metrics,
        })
    }

    /// Same as [`GatewayState::open`] with HTTP clients for the configured
    /// backend addresses
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ServerError> {
        let backends = http_pool(&config.backends, config.timeouts())?;
        Self::open(config, backends)
    }
}

/// Client-facing gateway server
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<GatewayState>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let state = Arc::new(GatewayState::from_config(&config)?);
        Ok(Self { config, state })
    }

    pub fn with_state(config: GatewayConfig, state: Arc<GatewayState>) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Build the combined router with all endpoints
    pub fn router(&self) -> Router {
        Router::new()
            .merge(auth_routes())
            .merge(gateway_routes())
            .merge(observability_routes())
            // Nodes enforce the size limit while streaming.
            .layer(DefaultBodyLimit::disable())
            .layer(cors_layer(&self.config.cors_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    /// Bind the configured address and serve until shutdown
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = parse_addr(&self.config.socket_addr())?;
        let listener = TcpListener::bind(addr).await?;
        info!(
            %addr,
            backends = self.config.backends.len(),
            records = self.state.proxy.directory().len(),
            "gateway listening"
        );
        self.serve(listener).await
    }
}

/// Internal storage node server
pub struct NodeServer {
    config: NodeConfig,
    state: Arc<NodeState>,
}

impl NodeServer {
    pub fn new(config: NodeConfig) -> Result<Self, ServerError> {
        let store = BlobStore::open(&config.storage_dir, config.max_file_size)?;
        Ok(Self {
            config,
            state: Arc::new(NodeState { store }),
        })
    }

    pub fn router(&self) -> Router {
        let limit = self.config.max_file_size.saturating_add(MULTIPART_OVERHEAD);
        Router::new()
            .merge(node_routes())
            .merge(health_routes())
            .layer(DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX)))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    pub async fn start(self) -> Result<(), ServerError> {
        let addr = parse_addr(&self.config.socket_addr())?;
        let listener = TcpListener::bind(addr).await?;
        info!(
            %addr,
            storage_dir = %self.config.storage_dir.display(),
            max_file_size = self.config.max_file_size,
            "storage node listening"
        );
        self.serve(listener).await
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    addr.parse()
        .map_err(|_| ServerError::InvalidAddress(addr.to_string()))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    } else {
        // No signal handler available; run until the task is dropped.
        std::future::pending::<()>().await;
    }
}
