//! Core types for the endpoint engine.
//!
//! - **IDs**: JSON-RPC request identifiers
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for server, logging and the engine

mod config;
mod errors;
mod ids;

pub use config::{Config, ObservabilityConfig, RpcConfig, ServerConfig};
pub use errors::{Error, Result};
pub use ids::RequestId;
