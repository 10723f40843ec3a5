use crate::ledger::{FieldKey, LedgerClient, METHOD_LIST_FIELD_STATES};
use crate::sync::SyncError;
use crate::sync::field_decoder::FieldValueDecoder;
use crate::sync::mirror::FieldMap;
use crate::sync::paginate::fetch_all_pages;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Fetches every field of an object at a given state root.
pub struct FieldStateFetcher<T> {
	ledger: Arc<LedgerClient>,
	decoder: FieldValueDecoder<T>,
	page_size: usize,
}

impl<T> FieldStateFetcher<T> {
	pub fn new(ledger: Arc<LedgerClient>, decoder: FieldValueDecoder<T>, page_size: usize) -> Self {
		Self {
			ledger,
			decoder,
			page_size: page_size.max(1),
		}
	}

	/// Build the complete field map of `object_id` as of `state_root`.
	///
	/// Fails if any page could not be fetched. Records without a value or
	/// with an undecodable value are left out.
	pub async fn fetch(&self, object_id: &str, state_root: &str) -> Result<FieldMap<T>, SyncError> {
		let ledger = &self.ledger;
		let page_size = self.page_size;
		let records = fetch_all_pages(METHOD_LIST_FIELD_STATES, None, move |cursor| {
			ledger.list_field_states(object_id, Some(state_root), cursor, page_size)
		})
		.await
		.into_complete(METHOD_LIST_FIELD_STATES)?;

		let total = records.len();
		let mut fields = HashMap::with_capacity(total);
		for record in records {
			let Some(value_hex) = record.value_hex() else {
				debug!("Field {} has no value", record.field_key);
				continue;
			};
			let key = FieldKey::new(record.field_key.clone());
			if let Some(value) = self.decoder.decode_field(&key, value_hex) {
				fields.insert(key, value);
			}
		}

		info!(
			"Fetched {} of {} fields of {} at {}",
			fields.len(),
			total,
			object_id,
			state_root
		);
		Ok(fields)
	}
}
