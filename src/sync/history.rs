use crate::ledger::{LedgerClient, METHOD_GET_TRANSACTIONS_BY_ORDER, TransactionWithInfoRecord};
use crate::sync::paginate::{PagedFetch, fetch_all_pages};
use serde_json::json;
use tracing::debug;

/// List ledger transactions by order, following every page.
///
/// # Arguments
/// * `ledger` - Client the pages are requested with.
/// * `after_order` - Exclusive starting order; `None` starts at the first
///   (or, descending, the latest) transaction.
/// * `page_size` - Transactions per request.
/// * `descending` - Walk from newer to older orders.
///
/// # Returns
/// Every transaction fetched. Check [`PagedFetch::is_complete`] before
/// treating the listing as the whole history.
pub async fn list_transactions(
	ledger: &LedgerClient,
	after_order: Option<u64>,
	page_size: usize,
	descending: bool,
) -> PagedFetch<TransactionWithInfoRecord> {
	let page_size = page_size.max(1);
	let fetch = fetch_all_pages(
		METHOD_GET_TRANSACTIONS_BY_ORDER,
		after_order.map(|order| json!(order.to_string())),
		move |cursor| ledger.get_transactions_by_order(cursor, page_size, descending),
	)
	.await;

	debug!(
		"Listed {} transactions over {} pages (after {:?}, descending: {})",
		fetch.items.len(),
		fetch.pages,
		after_order,
		descending
	);
	fetch
}
