//! JSON-RPC transport over a single WebSocket connection.
//!
//! [`RpcTransport`] is the seam the ledger client is written against;
//! [`WsRpcClient`] is the production implementation.

/// WebSocket client with pending-request table and reconnection
mod client;
/// Wire frames, connection state and transport errors
mod types;

pub use client::WsRpcClient;
pub use types::*;

use serde_json::Value;

/// Anything that can answer a JSON-RPC call.
#[async_trait::async_trait]
pub trait RpcTransport: Send + Sync {
	/// Issue `method` with `params` and return the response `result`.
	async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;
}

/// Derive the WebSocket URL for an RPC endpoint.
///
/// Secure HTTP becomes `wss://`, plain HTTP becomes `ws://`; WebSocket URLs
/// are returned unchanged.
pub fn websocket_url(base: &str) -> Result<String, TransportError> {
	let base = base.trim();
	if let Some(rest) = base.strip_prefix("https://") {
		Ok(format!("wss://{}", rest))
	} else if let Some(rest) = base.strip_prefix("http://") {
		Ok(format!("ws://{}", rest))
	} else if base.starts_with("ws://") || base.starts_with("wss://") {
		Ok(base.to_string())
	} else {
		Err(TransportError::InvalidConfig(format!(
			"unsupported URL scheme: {}",
			base
		)))
	}
}
