//! JSON-RPC 2.0 wire types and transport errors

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version stamped on every outgoing request.
pub const JSONRPC_VERSION: &str = "2.0";

/// A single outgoing JSON-RPC request frame.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Error object carried by a failed JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Raw frame as received from the server, before classification.
///
/// Responses carry an `id`; server pushes (subscription notifications) carry
/// a `method` and `params` instead.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A server-initiated message that is not a response to any request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcNotification {
    pub method: String,
    pub params: Value,
}

/// Classified incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Response to the request with the given id.
    Response {
        id: u64,
        outcome: Result<Value, JsonRpcErrorObject>,
    },
    /// Server push.
    Notification(RpcNotification),
    /// Valid JSON that is neither a response nor a notification.
    Unrecognized,
}

impl IncomingFrame {
    pub fn classify(self) -> ServerMessage {
        if let (Some(method), Some(params)) = (self.method, self.params) {
            return ServerMessage::Notification(RpcNotification { method, params });
        }

        match self.id {
            Some(id) => {
                let outcome = match self.error {
                    Some(error) => Err(error),
                    // A missing or null result is a valid "no value" response
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                ServerMessage::Response { id, outcome }
            }
            None => ServerMessage::Unrecognized,
        }
    }
}

/// Lifecycle of the single transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    Connecting,
    /// Socket open, requests accepted.
    Connected,
    /// Waiting for or performing reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted. Terminal.
    Failed,
    /// Closed on purpose through `disconnect()`. Terminal.
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Disconnected)
    }
}

/// Error types for the RPC transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket is not connected")]
    NotConnected,

    #[error("WebSocket disconnected")]
    Disconnected,

    #[error("WebSocket connection failed after {attempts} reconnection attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Request {method} timed out after {elapsed_ms}ms")]
    Timeout { method: String, elapsed_ms: u128 },

    #[error("Connection not ready within {0}ms")]
    ConnectTimeout(u128),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),
}

impl From<JsonRpcErrorObject> for TransportError {
    fn from(error: JsonRpcErrorObject) -> Self {
        TransportError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}
