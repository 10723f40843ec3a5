//! Incremental mirror of a Rooch object's dynamic fields.
//!
//! A [`rpc::WsRpcClient`] carries JSON-RPC over one WebSocket connection.
//! [`sync::FieldSyncService`] uses it to keep a local map of field key to
//! decoded value in step with the ledger: a full listing whenever the state
//! root changes and change-set diffs in between.

/// Configuration structs and environment loading
pub mod config;
/// Typed ledger RPC methods and wire records
pub mod ledger;
/// WebSocket JSON-RPC transport
pub mod rpc;
/// Field synchronization
pub mod sync;
/// Hex and formatting helpers
pub mod utils;

pub use config::{AppConfig, EmptyDiffPolicy, SyncConfig, TransportConfig};
pub use ledger::FieldKey;
pub use rpc::{RpcTransport, TransportError, WsRpcClient};
pub use sync::{FieldStateHandle, FieldSyncService, SyncError};
