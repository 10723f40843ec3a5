use crate::ledger::{LedgerClient, LedgerHead};
use crate::sync::SyncError;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Outcome of one root observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootChange {
	/// The ledger has no executed transaction yet.
	NoHead,
	/// Same root as before. The stored order is still refreshed.
	Unchanged(LedgerHead),
	/// First root seen since start.
	Initial(LedgerHead),
	Changed { previous: String, head: LedgerHead },
}

impl RootChange {
	/// Head a full sync should be taken at, if this observation calls for one.
	pub fn sync_target(&self) -> Option<&LedgerHead> {
		match self {
			RootChange::Initial(head) | RootChange::Changed { head, .. } => Some(head),
			RootChange::NoHead | RootChange::Unchanged(_) => None,
		}
	}
}

/// Detects state root changes by polling the latest ledger transaction
pub struct StateRootWatcher {
	ledger: Arc<LedgerClient>,
	latest: Mutex<Option<LedgerHead>>,
}

impl StateRootWatcher {
	pub fn new(ledger: Arc<LedgerClient>) -> Self {
		Self {
			ledger,
			latest: Mutex::new(None),
		}
	}

	/// Fetch the latest head and compare its root with the last one seen.
	pub async fn poll(&self) -> Result<RootChange, SyncError> {
		match self.ledger.latest_head().await? {
			Some(head) => Ok(self.observe(head)),
			None => Ok(RootChange::NoHead),
		}
	}

	/// Record `head` as the latest known head.
	pub fn observe(&self, head: LedgerHead) -> RootChange {
		let mut latest = self.latest.lock().unwrap();
		let change = match latest.as_ref() {
			None => RootChange::Initial(head.clone()),
			Some(previous) if previous.state_root == head.state_root => {
				RootChange::Unchanged(head.clone())
			}
			Some(previous) => RootChange::Changed {
				previous: previous.state_root.clone(),
				head: head.clone(),
			},
		};
		debug!(
			"Observed root {} at order {}",
			head.state_root, head.tx_order
		);
		*latest = Some(head);
		change
	}

	pub fn latest(&self) -> Option<LedgerHead> {
		self.latest.lock().unwrap().clone()
	}

	pub fn state_root(&self) -> Option<String> {
		self.latest
			.lock()
			.unwrap()
			.as_ref()
			.map(|head| head.state_root.clone())
	}
}
