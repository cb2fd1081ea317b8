//! Built-in parts every LSP-style endpoint serves.

pub mod cancel;
pub mod lifecycle;

pub use cancel::{CancelParams, CancelRequestPart};
pub use lifecycle::LifecyclePart;

use crate::rpc::Endpoint;

/// Attach all built-in parts to `endpoint`.
pub fn attach_builtin(endpoint: &Endpoint) {
    endpoint.attach::<CancelRequestPart>();
    endpoint.attach::<LifecyclePart>();
}
