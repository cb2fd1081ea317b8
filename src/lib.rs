//! # rpc-core - JSON-RPC 2.0 endpoint engine
//!
//! Transport and dispatch core for LSP-style endpoints:
//! - Content-Length framed streams (`rpc::codec`)
//! - JSON-RPC 2.0 message model with batch decoding (`rpc::message`)
//! - Method registry aggregated from the endpoint and its parts (`rpc::registry`)
//! - Bidirectional endpoint with request correlation, cancellation and a
//!   bounded worker pool for blocking handlers (`rpc::endpoint`)
//! - TCP and stdio serving (`rpc::server`)
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────────────────┐
//!   bytes in  →  │ FrameCodec → decode → task per message    │
//!                │                 │                         │
//!                │        ┌────────┴────────┐                │
//!                │        │ MethodRegistry  │ ← parts        │
//!                │        └────────┬────────┘                │
//!                │   async handler │ worker pool (threaded)  │
//!                │                 ▼                         │
//!   bytes out ←  │ FrameCodec ← writer task ← send_*         │
//!                └──────────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod parts;
pub mod rpc;
pub mod types;

// Internal utilities
pub mod observability;

pub use rpc::{Endpoint, MethodEntry, Part, PartInit, RequestContext};
pub use types::{Config, Error, RequestId, Result};
