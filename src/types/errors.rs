//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Every
//! variant maps onto a JSON-RPC error object via [`Error::to_error_object`],
//! which is what the endpoint sends back to the peer.

use serde_json::Value;
use thiserror::Error;

use crate::rpc::message::{codes, ErrorObject};

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the endpoint engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Body is not valid JSON (or not valid text in its charset).
    #[error("parse error: {0}")]
    Parse(String),

    /// Well-formed JSON that is not a valid JSON-RPC message.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `jsonrpc` field present but not "2.0".
    #[error("invalid JSON-RPC protocol version: {0}")]
    ProtocolVersion(String),

    /// No handler registered under the requested name.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Params could not be converted into the handler's declared type.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Typed application error raised by a handler, or an error reply from the peer.
    #[error("{}", .0.message)]
    Rpc(ErrorObject),

    /// Request was cancelled before it completed.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// Connection went away while the operation was outstanding.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Timeout waiting for a reply or for the transport.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Too many outstanding requests.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convert to the JSON-RPC error object reported to the peer.
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Error::Parse(_) => ErrorObject::new(codes::PARSE_ERROR, self.to_string()),
            Error::InvalidRequest(_) | Error::ProtocolVersion(_) => {
                ErrorObject::new(codes::INVALID_REQUEST, self.to_string())
            }
            Error::MethodNotFound(method) => {
                ErrorObject::new(codes::METHOD_NOT_FOUND, format!("Unknown method: {}", method))
            }
            Error::InvalidParams(_) => ErrorObject::new(codes::INVALID_PARAMS, self.to_string()),
            Error::Rpc(obj) => obj.clone(),
            Error::Cancelled(_) => ErrorObject::new(codes::REQUEST_CANCELLED, "Request canceled."),
            Error::ConnectionClosed(_)
            | Error::Timeout(_)
            | Error::QuotaExceeded(_)
            | Error::Internal(_)
            | Error::Serialization(_)
            | Error::Io(_) => ErrorObject::new(codes::INTERNAL_ERROR, self.to_string()),
        }
    }

    /// Wire error code this error maps to.
    pub fn code(&self) -> i64 {
        self.to_error_object().code
    }
}

// Convenience constructors
impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound(method.into())
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Application-level error with an explicit code.
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc(ErrorObject::new(code, message))
    }

    /// Application-level error with an explicit code and `data` payload.
    pub fn rpc_with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self::Rpc(ErrorObject::new(code, message).with_data(data))
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn connection_closed(msg: impl Into<String>) -> Self {
        Self::ConnectionClosed(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<ErrorObject> for Error {
    fn from(obj: ErrorObject) -> Self {
        Error::Rpc(obj)
    }
}
