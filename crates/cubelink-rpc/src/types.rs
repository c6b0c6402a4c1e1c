//! JSON-RPC 2.0 wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only protocol version this channel speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// An outbound or inbound JSON-RPC request.
///
/// A request without an `id` is a notification: no response is expected
/// and none is sent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol version tag; always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id; absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Method name (e.g. `discover`).
    pub method: String,
    /// Parameters object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC response carrying either a `result` or an `error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Protocol version tag; always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id of the request being answered.
    pub id: Option<u64>,
    /// Result payload; `null` when the call produced no value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload; present only on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Any inbound wire message: a call (carries `method`) or a response.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
    /// The remote party initiated a call.
    Call(RpcRequest),
    /// The remote party answered one of ours.
    Response(RpcResponse),
}

impl RpcRequest {
    /// Build a request, or a notification when `id` is `None`.
    pub fn new(id: Option<u64>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params,
        }
    }
}

impl RpcResponse {
    /// Build a success response; `result` is `null` when the call
    /// produced no value.
    pub fn result(id: u64, result: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            result: Some(result.unwrap_or(Value::Null)),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: u64, error: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }
}

impl RpcMessage {
    /// The version tag carried by the message.
    pub fn version(&self) -> &str {
        match self {
            Self::Call(request) => &request.jsonrpc,
            Self::Response(response) => &response.jsonrpc,
        }
    }
}
