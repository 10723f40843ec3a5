//! Cursor-driven pagination shared by the full sync and the diff engine.

use crate::ledger::{LedgerError, Page};
use crate::sync::SyncError;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, error};

/// Result of draining a paginated listing.
///
/// Items gathered before a failing page are kept; `error` tells the caller
/// the listing was cut short.
#[derive(Debug)]
pub struct PagedFetch<T> {
	pub items: Vec<T>,
	pub pages: usize,
	pub error: Option<LedgerError>,
}

impl<T> PagedFetch<T> {
	pub fn is_complete(&self) -> bool {
		self.error.is_none()
	}

	/// Accept the items only if every page was fetched.
	pub fn into_complete(self, method: &'static str) -> Result<Vec<T>, SyncError> {
		match self.error {
			None => Ok(self.items),
			Some(e) => Err(SyncError::IncompletePagination {
				method,
				pages: self.pages,
				reason: e.to_string(),
			}),
		}
	}
}

/// Fetch pages until the server reports no further page.
///
/// `fetch_page` receives the cursor to request, starting with `start`. A page
/// that claims more data without a cursor ends the loop with
/// [`LedgerError::MissingCursor`].
pub async fn fetch_all_pages<T, F, Fut>(
	method: &'static str,
	start: Option<Value>,
	mut fetch_page: F,
) -> PagedFetch<T>
where
	F: FnMut(Option<Value>) -> Fut,
	Fut: Future<Output = Result<Page<T>, LedgerError>>,
{
	let mut items = Vec::new();
	let mut pages = 0;
	let mut cursor = start;

	loop {
		let page = match fetch_page(cursor.take()).await {
			Ok(page) => page,
			Err(e) => {
				error!("{} failed on page {}: {}", method, pages + 1, e);
				return PagedFetch {
					items,
					pages,
					error: Some(e),
				};
			}
		};
		pages += 1;
		items.extend(page.data);

		if !page.has_next_page {
			break;
		}
		match page.next_cursor {
			Some(next) if !next.is_null() => cursor = Some(next),
			_ => {
				error!("{} reported a next page without a cursor", method);
				return PagedFetch {
					items,
					pages,
					error: Some(LedgerError::MissingCursor),
				};
			}
		}
	}

	debug!("{}: {} items over {} pages", method, items.len(), pages);
	PagedFetch {
		items,
		pages,
		error: None,
	}
}
