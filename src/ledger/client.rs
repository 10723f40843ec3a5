//!
//! Typed client for the ledger RPC methods used by field sync.
//!
//! Every call goes through an [`RpcTransport`], so the same client runs over
//! the WebSocket transport in production and over scripted transports in tests.

use super::types::*;
use crate::rpc::RpcTransport;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

pub const METHOD_LIST_FIELD_STATES: &str = "rooch_listFieldStates";
pub const METHOD_SYNC_STATES: &str = "rooch_syncStates";
pub const METHOD_GET_TRANSACTIONS_BY_ORDER: &str = "rooch_getTransactionsByOrder";
pub const METHOD_EXECUTE_RAW_TRANSACTION: &str = "rooch_executeRawTransaction";

/// Rooch ledger RPC client
#[derive(Clone)]
pub struct LedgerClient {
	transport: Arc<dyn RpcTransport>,
}

impl LedgerClient {
	/// Create a new ledger client.
	///
	/// # Arguments
	/// * `transport` - The transport every call is issued on.
	pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
		Self { transport }
	}

	/// List one page of an object's dynamic fields as of `state_root`.
	///
	/// # Arguments
	/// * `object_id` - The parent object.
	/// * `state_root` - Snapshot to read; `None` reads the latest state.
	/// * `cursor` - Cursor returned by the previous page, `None` for the first.
	/// * `limit` - Page size.
	///
	/// # Returns
	/// A page of field records, values left hex encoded.
	pub async fn list_field_states(
		&self,
		object_id: &str,
		state_root: Option<&str>,
		cursor: Option<Value>,
		limit: usize,
	) -> Result<Page<FieldStateRecord>, LedgerError> {
		let mut options = json!({ "decode": false, "showDisplay": false });
		if let Some(root) = state_root {
			options["stateRoot"] = json!(root);
		}
		let params = json!([object_id, cursor, limit.to_string(), options]);
		self.call(METHOD_LIST_FIELD_STATES, params).await
	}

	/// List one page of change-sets touching `object_id`, in ascending order.
	///
	/// # Arguments
	/// * `object_id` - The parent object used as filter.
	/// * `cursor` - Either the first order to include (as a decimal string) or
	///   the cursor returned by the previous page.
	/// * `limit` - Page size.
	pub async fn sync_states(
		&self,
		object_id: &str,
		cursor: Option<Value>,
		limit: usize,
	) -> Result<Page<StateChangeSetRecord>, LedgerError> {
		let params = json!([
			{ "object_id": object_id },
			cursor,
			limit.to_string(),
			{ "decode": false, "descending": false }
		]);
		self.call(METHOD_SYNC_STATES, params).await
	}

	/// List one page of transactions by order.
	pub async fn get_transactions_by_order(
		&self,
		cursor: Option<Value>,
		limit: usize,
		descending: bool,
	) -> Result<Page<TransactionWithInfoRecord>, LedgerError> {
		let params = json!([cursor, limit.to_string(), descending]);
		self.call(METHOD_GET_TRANSACTIONS_BY_ORDER, params).await
	}

	/// Fetch the most recent transaction's state root and order.
	///
	/// # Returns
	/// `Ok(None)` if the ledger has no executed transaction yet.
	pub async fn latest_head(&self) -> Result<Option<LedgerHead>, LedgerError> {
		let page = self.get_transactions_by_order(None, 1, true).await?;
		Ok(page.data.first().and_then(TransactionWithInfoRecord::head))
	}

	/// Submit an already signed, BCS encoded transaction.
	///
	/// # Arguments
	/// * `tx_hex` - The `0x` prefixed transaction bytes.
	///
	/// # Returns
	/// The sequencing info assigned by the node.
	pub async fn execute_raw_transaction(
		&self,
		tx_hex: &str,
	) -> Result<ExecuteTxRecord, LedgerError> {
		let params = json!([tx_hex, { "withOutput": false }]);
		self.call(METHOD_EXECUTE_RAW_TRANSACTION, params).await
	}

	async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, LedgerError> {
		debug!("Calling {}", method);
		let result = self.transport.request(method, params).await?;
		if result.is_null() {
			return Err(LedgerError::NoData);
		}
		Ok(serde_json::from_value(result)?)
	}
}
