//! JSON-RPC 2.0 message model.
//!
//! # Shapes
//!
//! - **Request**: `id` + `method` (+ `params`), expects a reply
//! - **Notification**: `method` (+ `params`), no `id`, never answered
//! - **Response**: `id` + `result`
//! - **Error**: `id` (possibly `null`) + `error:{code, message, data?}`
//!
//! Decoding discriminates on the fields present: `error` wins over `result`,
//! and `method` without either is a request or a notification depending on
//! whether `id` is present. A JSON array body is a batch.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Error, RequestId, Result};

/// The only protocol version accepted on the wire.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Standard and extension JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// First code of the reserved server-defined range (`-32000..=-32099`).
    pub const SERVER_ERROR_START: i64 = -32000;
    /// Last code of the reserved server-defined range.
    pub const SERVER_ERROR_END: i64 = -32099;
    /// Non-standard: the request was cancelled.
    pub const REQUEST_CANCELLED: i64 = -32800;

    /// Whether `code` lies in the reserved server-defined range.
    pub fn is_server_error(code: i64) -> bool {
        (SERVER_ERROR_END..=SERVER_ERROR_START).contains(&code)
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// `None` when answering a message whose id could not be determined.
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

/// Any JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
    Error(ErrorResponse),
}

impl Message {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Request(Request {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    pub fn response(id: impl Into<RequestId>, result: Value) -> Self {
        Message::Response(Response {
            id: id.into(),
            result,
        })
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Message::Error(ErrorResponse { id, error })
    }

    /// Id carried by the message, if any.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(r) => Some(&r.id),
            Message::Notification(_) => None,
            Message::Response(r) => Some(&r.id),
            Message::Error(e) => e.id.as_ref(),
        }
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    /// Encode as compact JSON.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a single message object.
    pub fn from_value(value: Value) -> Result<Message> {
        let Value::Object(mut obj) = value else {
            return Err(Error::invalid_request("message must be a JSON object"));
        };

        match obj.remove("jsonrpc") {
            Some(Value::String(v)) if v == PROTOCOL_VERSION => {}
            Some(other) => {
                let shown = match other {
                    Value::String(s) => s,
                    v => v.to_string(),
                };
                return Err(Error::ProtocolVersion(shown));
            }
            None => return Err(Error::invalid_request("missing \"jsonrpc\" member")),
        }

        let params = take_params(&mut obj);

        if let Some(error) = obj.remove("error") {
            let error: ErrorObject = serde_json::from_value(error)
                .map_err(|e| Error::invalid_request(format!("malformed error object: {}", e)))?;
            let id = match obj.remove("id") {
                None | Some(Value::Null) => None,
                Some(v) => Some(parse_id(&v)?),
            };
            return Ok(Message::Error(ErrorResponse { id, error }));
        }

        if let Some(result) = obj.remove("result") {
            let id = match obj.remove("id") {
                None | Some(Value::Null) => {
                    return Err(Error::invalid_request("response id is null"))
                }
                Some(v) => parse_id(&v)?,
            };
            return Ok(Message::Response(Response { id, result }));
        }

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(Error::invalid_request("\"method\" must be a string"));
            };
            return match obj.remove("id") {
                None => Ok(Message::Notification(Notification { method, params })),
                Some(v) => Ok(Message::Request(Request {
                    id: parse_id(&v)?,
                    method,
                    params,
                })),
            };
        }

        Err(Error::invalid_request(
            "message has none of \"method\", \"result\" or \"error\"",
        ))
    }
}

fn take_params(obj: &mut Map<String, Value>) -> Option<Value> {
    match obj.remove("params") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v),
    }
}

fn parse_id(value: &Value) -> Result<RequestId> {
    RequestId::from_value(value)
        .ok_or_else(|| Error::invalid_request(format!("invalid id: {}", value)))
}

/// Decode a frame body: one message or a batch.
///
/// The outer error covers text that is not JSON at all (or an empty batch);
/// each inner result is one message of the batch.
pub fn decode_body(text: &str) -> Result<Vec<Result<Message>>> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::parse(format!("{}", e)))?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(Error::invalid_request("empty batch"));
            }
            Ok(items.into_iter().map(Message::from_value).collect())
        }
        v => Ok(vec![Message::from_value(v)]),
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("jsonrpc", PROTOCOL_VERSION)?;
        match self {
            Message::Request(r) => {
                map.serialize_entry("id", &r.id)?;
                map.serialize_entry("method", &r.method)?;
                if let Some(params) = &r.params {
                    map.serialize_entry("params", params)?;
                }
            }
            Message::Notification(n) => {
                map.serialize_entry("method", &n.method)?;
                if let Some(params) = &n.params {
                    map.serialize_entry("params", params)?;
                }
            }
            Message::Response(r) => {
                map.serialize_entry("id", &r.id)?;
                map.serialize_entry("result", &r.result)?;
            }
            Message::Error(e) => {
                map.serialize_entry("id", &e.id)?;
                map.serialize_entry("error", &e.error)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(de::Error::custom)
    }
}
