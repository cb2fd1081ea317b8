//! JSON-RPC 2.0 engine over Content-Length framed streams.
//!
//! Wire format matches the LSP base protocol: a `Content-Length` header
//! block, a blank line, then a UTF-8 JSON body.

pub mod codec;
pub mod endpoint;
pub mod message;
pub mod params;
pub mod part;
pub mod recovery;
pub mod registry;
pub mod server;

pub use codec::{Frame, FrameCodec};
pub use endpoint::{Endpoint, PendingResponse, RequestContext, RequestState, WeakEndpoint};
pub use message::{ErrorObject, Message};
pub use part::{Part, PartInit};
pub use registry::{MethodEntry, MethodRegistry};
pub use server::{serve_stdio, RpcServer};
