//! Server Configuration
//!
//! JSON configuration for the gateway and the storage node. Every optional
//! field has a default; `validate()` rejects configurations that would only
//! fail later at runtime.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::directory::DirectoryOptions;
use crate::gateway::BackendTimeouts;
use crate::observability::LogFormat;

/// One year
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 3600;

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 4000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Storage node base URLs. Order defines round-robin order.
    #[serde(default)]
    pub backends: Vec<String>,

    /// Holds the directory log and the users file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,

    #[serde(default = "default_stream_idle_timeout_ms")]
    pub stream_idle_timeout_ms: u64,

    #[serde(default = "default_compaction_min_garbage")]
    pub compaction_min_garbage: usize,

    /// CORS allowed origins; empty means permissive
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub log_format: LogFormat,
}

/// Storage node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 4001)
    #[serde(default = "default_node_port")]
    pub port: u16,

    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Largest accepted blob in bytes (default: 100 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    4000
}

fn default_node_port() -> u16 {
    4001
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}

fn default_token_ttl_secs() -> u64 {
    3600
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_upload_timeout_ms() -> u64 {
    300_000
}

fn default_stream_idle_timeout_ms() -> u64 {
    30_000
}

fn default_compaction_min_garbage() -> usize {
    DirectoryOptions::default().compaction_min_garbage
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_gateway_port(),
            backends: Vec::new(),
            data_dir: default_data_dir(),
            jwt_secret: String::new(),
            token_ttl_secs: default_token_ttl_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            upload_timeout_ms: default_upload_timeout_ms(),
            stream_idle_timeout_ms: default_stream_idle_timeout_ms(),
            compaction_min_garbage: default_compaction_min_garbage(),
            cors_origins: Vec::new(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_node_port(),
            storage_dir: default_storage_dir(),
            max_file_size: default_max_file_size(),
            log_format: LogFormat::default(),
        }
    }
}

impl GatewayConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeouts(&self) -> BackendTimeouts {
        BackendTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            request: Duration::from_millis(self.request_timeout_ms),
            upload: Duration::from_millis(self.upload_timeout_ms),
            stream_idle: Duration::from_millis(self.stream_idle_timeout_ms),
        }
    }

    pub fn directory_options(&self) -> DirectoryOptions {
        DirectoryOptions {
            compaction_min_garbage: self.compaction_min_garbage,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backends.is_empty() {
            return Err("at least one backend must be configured".to_string());
        }
        for backend in &self.backends {
            if !(backend.starts_with("http://") || backend.starts_with("https://")) {
                return Err(format!("backend address must be an http(s) URL: {}", backend));
            }
        }
        let mut unique = self.backends.clone();
        unique.sort();
        unique.dedup();
        if unique.len() != self.backends.len() {
            return Err("backend addresses must be unique".to_string());
        }
        if self.jwt_secret.is_empty() {
            return Err("jwt_secret must be set".to_string());
        }
        if self.token_ttl_secs == 0 || self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(format!("token_ttl_secs must be between 1 and {}", MAX_TOKEN_TTL_SECS));
        }
        let timeouts = [
            self.connect_timeout_ms,
            self.request_timeout_ms,
            self.upload_timeout_ms,
            self.stream_idle_timeout_ms,
        ];
        if timeouts.contains(&0) {
            return Err("timeouts must be positive".to_string());
        }
        Ok(())
    }
}

impl NodeConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_file_size == 0 {
            return Err("max_file_size must be positive".to_string());
        }
        Ok(())
    }
}
