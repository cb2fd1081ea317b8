//! Configuration structures.
//!
//! Configuration is built from defaults and optionally loaded from a JSON
//! file; the binary overrides individual fields from the command line.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::{Error, Result};

/// Global endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// JSON-RPC engine configuration.
    #[serde(default)]
    pub rpc: RpcConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::internal(format!("failed to read config {}: {}", path.display(), e))
        })?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind address used when not serving over stdio.
    pub listen_addr: String,

    /// Maximum concurrent TCP connections. Connections beyond this limit
    /// are refused.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50051".to_string(),
            max_connections: 64,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// JSON-RPC engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Maximum accepted `Content-Length`. Larger frames are discarded and
    /// answered with a parse error.
    pub max_frame_bytes: usize,

    /// Permits of the bounded worker pool that runs threaded handlers.
    pub worker_threads: usize,

    /// Per-request reply timeout for `send_request`. `None` waits until the
    /// peer answers or the connection closes.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Upper bound on outstanding sent requests.
    pub max_pending_requests: usize,

    /// Write timeout per outbound frame. A peer that cannot accept a frame
    /// within this window is dropped.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// How long teardown waits for in-flight handlers before aborting them.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024 * 1024,
            worker_threads: 4,
            request_timeout: None,
            max_pending_requests: 4096,
            write_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
