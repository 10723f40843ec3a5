//! Field sync engine.
//!
//! Keeps the mirror consistent with the ledger through two paths: a full
//! sync whenever the state root changes, and a diff poll that applies
//! change-sets newer than the cursor. The two are mutually exclusive: a diff
//! poll does not start while a full sync is in flight, and diff results
//! fetched across a full sync are discarded.

use crate::config::SyncConfig;
use crate::ledger::{ChangeSet, FieldOp, LedgerClient, LedgerHead, METHOD_SYNC_STATES};
use crate::sync::delay_tracker::DelayTracker;
use crate::sync::events::{EventDispatcher, SyncEvent, SyncEventHandler, SyncStage};
use crate::sync::field_decoder::FieldValueDecoder;
use crate::sync::full_sync::FieldStateFetcher;
use crate::sync::mirror::{MirrorSnapshot, MirrorState, MirrorTransition};
use crate::sync::paginate::fetch_all_pages;
use crate::sync::root_watcher::RootChange;
use crate::sync::{SyncError, SyncPhase};
use itertools::Itertools;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Result of a full sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FullSyncOutcome {
	Replaced { state_root: String, tx_order: u64, field_count: usize },
	/// Another full sync was already running; the request was ignored.
	AlreadyInFlight,
}

/// Why a diff poll did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSkipReason {
	/// No full sync has completed yet.
	NoCursor,
	FullSyncInFlight,
	DiffInFlight,
	/// A full sync replaced the mirror while the change-sets were fetched.
	Superseded,
}

/// Summary of one diff poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
	pub change_sets: usize,
	pub empty_change_sets: usize,
	pub applied_ops: usize,
	pub decode_failures: usize,
	/// Transition of the last change-set with field changes.
	pub transition: Option<MirrorTransition>,
	pub cursor: u64,
	/// Pagination stopped early; the cursor only covers what was fetched.
	pub incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
	Skipped(DiffSkipReason),
	Applied(DiffReport),
}

/// Bounded set of tx orders already reported to the delay tracker.
struct ProcessedOrders {
	capacity: usize,
	order: VecDeque<u64>,
	seen: HashSet<u64>,
}

impl ProcessedOrders {
	fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			order: VecDeque::new(),
			seen: HashSet::new(),
		}
	}

	fn contains(&self, tx_order: u64) -> bool {
		self.seen.contains(&tx_order)
	}

	/// Returns false if `tx_order` was already recorded.
	fn insert(&mut self, tx_order: u64) -> bool {
		if !self.seen.insert(tx_order) {
			return false;
		}
		self.order.push_back(tx_order);
		while self.order.len() > self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.seen.remove(&oldest);
			}
		}
		true
	}
}

/// Resets an in-flight flag when dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
	fn acquire(flag: &'a AtomicBool) -> Option<Self> {
		flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.ok()
			.map(|_| Self(flag))
	}
}

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

/// Synchronizes the fields of one object into a local mirror
pub struct FieldSyncEngine<T> {
	config: SyncConfig,
	ledger: Arc<LedgerClient>,
	fetcher: FieldStateFetcher<T>,
	decoder: FieldValueDecoder<T>,
	mirror: Mutex<MirrorState<T>>,
	published: watch::Sender<MirrorSnapshot<T>>,
	full_sync_in_flight: AtomicBool,
	diff_in_flight: AtomicBool,
	processed_orders: Mutex<ProcessedOrders>,
	delay_tracker: Arc<DelayTracker>,
	events: tokio::sync::Mutex<EventDispatcher>,
}

impl<T: Clone + Send + Sync + 'static> FieldSyncEngine<T> {
	pub fn new(
		config: SyncConfig,
		ledger: Arc<LedgerClient>,
		decoder: FieldValueDecoder<T>,
		delay_tracker: Arc<DelayTracker>,
	) -> Self {
		let fetcher = FieldStateFetcher::new(ledger.clone(), decoder.clone(), config.page_size);
		let (published, _) = watch::channel(MirrorSnapshot::default());
		Self {
			mirror: Mutex::new(MirrorState::new(config.empty_diff_policy)),
			processed_orders: Mutex::new(ProcessedOrders::new(config.processed_orders_capacity)),
			config,
			ledger,
			fetcher,
			decoder,
			published,
			full_sync_in_flight: AtomicBool::new(false),
			diff_in_flight: AtomicBool::new(false),
			delay_tracker,
			events: tokio::sync::Mutex::new(EventDispatcher::new()),
		}
	}

	pub async fn register_handler(&self, handler: Box<dyn SyncEventHandler>) {
		self.events.lock().await.register_handler(handler);
	}

	pub async fn emit(&self, event: SyncEvent) {
		self.events.lock().await.dispatch(&event).await;
	}

	pub fn phase(&self) -> SyncPhase {
		if self.full_sync_in_flight.load(Ordering::SeqCst) {
			SyncPhase::FullSyncInFlight
		} else if self.diff_in_flight.load(Ordering::SeqCst) {
			SyncPhase::DiffPollInFlight
		} else {
			SyncPhase::Idle
		}
	}

	pub fn snapshot(&self) -> MirrorSnapshot<T> {
		self.published.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<MirrorSnapshot<T>> {
		self.published.subscribe()
	}

	/// True while no full sync has completed at `state_root`.
	pub fn needs_full_sync(&self, state_root: &str) -> bool {
		self.mirror.lock().unwrap().synced_root() != Some(state_root)
	}

	/// React to a root observation: announce it and full sync if it calls for one.
	pub async fn on_root_change(&self, change: &RootChange) -> Result<Option<FullSyncOutcome>, SyncError> {
		let Some(head) = change.sync_target() else {
			return Ok(None);
		};
		let previous = match change {
			RootChange::Changed { previous, .. } => Some(previous.clone()),
			_ => None,
		};
		self.emit(SyncEvent::RootChanged {
			previous,
			state_root: head.state_root.clone(),
			tx_order: head.tx_order,
		})
		.await;
		self.full_sync(head).await.map(Some)
	}

	/// Replace the mirror with every field as of `head`.
	///
	/// Only one full sync runs at a time; a concurrent call returns
	/// [`FullSyncOutcome::AlreadyInFlight`]. On failure the mirror is left as is.
	pub async fn full_sync(&self, head: &LedgerHead) -> Result<FullSyncOutcome, SyncError> {
		let Some(_guard) = InFlight::acquire(&self.full_sync_in_flight) else {
			debug!("Full sync already in flight, ignoring root {}", head.state_root);
			return Ok(FullSyncOutcome::AlreadyInFlight);
		};

		info!(
			"Full sync of {} at root {} (order {})",
			self.config.object_id, head.state_root, head.tx_order
		);
		self.update_mirror(|mirror| mirror.set_loading(true));

		match self.fetcher.fetch(&self.config.object_id, &head.state_root).await {
			Ok(fields) => {
				let field_count = fields.len();
				self.update_mirror(|mirror| {
					mirror.replace_authoritative(fields, head.state_root.clone(), head.tx_order)
				});
				self.emit(SyncEvent::FullSyncCompleted {
					state_root: head.state_root.clone(),
					tx_order: head.tx_order,
					field_count,
				})
				.await;
				Ok(FullSyncOutcome::Replaced {
					state_root: head.state_root.clone(),
					tx_order: head.tx_order,
					field_count,
				})
			}
			Err(e) => {
				error!("Full sync at root {} failed: {}", head.state_root, e);
				self.update_mirror(|mirror| mirror.set_loading(false));
				self.emit(SyncEvent::SyncFailed {
					stage: SyncStage::FullSync,
					error: e.to_string(),
				})
				.await;
				Err(e)
			}
		}
	}

	/// Apply every change-set from the cursor onwards.
	pub async fn poll_diff(&self) -> Result<DiffOutcome, SyncError> {
		if self.full_sync_in_flight.load(Ordering::SeqCst) {
			return Ok(DiffOutcome::Skipped(DiffSkipReason::FullSyncInFlight));
		}
		let (cursor, epoch) = {
			let mirror = self.mirror.lock().unwrap();
			(mirror.cursor(), mirror.epoch())
		};
		let Some(cursor) = cursor else {
			return Ok(DiffOutcome::Skipped(DiffSkipReason::NoCursor));
		};
		let Some(_guard) = InFlight::acquire(&self.diff_in_flight) else {
			return Ok(DiffOutcome::Skipped(DiffSkipReason::DiffInFlight));
		};

		let ledger = &self.ledger;
		let object_id = self.config.object_id.as_str();
		let page_size = self.config.page_size.max(1);
		let fetch = fetch_all_pages(
			METHOD_SYNC_STATES,
			Some(json!(cursor.to_string())),
			move |page_cursor| ledger.sync_states(object_id, page_cursor, page_size),
		)
		.await;

		let incomplete = !fetch.is_complete();
		if let Some(e) = &fetch.error {
			warn!("Diff fetch from order {} incomplete: {}", cursor, e);
		}

		let change_sets: Vec<ChangeSet> = fetch
			.items
			.into_iter()
			.map(|record| record.into_change_set())
			.sorted_by_key(|change_set| change_set.tx_order)
			.collect();

		let mut report = DiffReport {
			incomplete,
			..DiffReport::default()
		};
		let mut synced_orders = Vec::new();
		{
			let mut mirror = self.mirror.lock().unwrap();
			if mirror.epoch() != epoch || self.full_sync_in_flight.load(Ordering::SeqCst) {
				debug!("Discarding {} change-sets fetched across a full sync", change_sets.len());
				return Ok(DiffOutcome::Skipped(DiffSkipReason::Superseded));
			}

			for change_set in &change_sets {
				mirror.advance_cursor_past(change_set.tx_order);
				report.change_sets += 1;
				if change_set.skipped > 0 {
					debug!(
						"Order {}: {} field entries without key or operation",
						change_set.tx_order, change_set.skipped
					);
				}
				if change_set.changes.is_empty() {
					report.empty_change_sets += 1;
					continue;
				}

				let mut candidate = mirror.working_copy();
				let mut applied = 0;
				for change in &change_set.changes {
					match &change.op {
						FieldOp::New(value) | FieldOp::Modify(value) => {
							match self.decoder.decode_field(&change.key, value) {
								Some(decoded) => {
									candidate.insert(change.key.clone(), decoded);
									applied += 1;
								}
								None => report.decode_failures += 1,
							}
						}
						FieldOp::Delete => {
							if candidate.remove(&change.key).is_some() {
								applied += 1;
							}
						}
					}
				}

				report.applied_ops += applied;
				report.transition = Some(mirror.merge_best_effort(candidate, applied));
				synced_orders.push(change_set.tx_order);
			}

			report.cursor = mirror.cursor().unwrap_or(cursor);
			self.publish(mirror.snapshot());
		}

		for tx_order in synced_orders {
			self.observe_synced_order(tx_order).await;
		}

		if report.change_sets > 0 {
			let field_count = self.published.borrow().fields.len();
			self.emit(SyncEvent::DiffApplied {
				change_sets: report.change_sets,
				applied_ops: report.applied_ops,
				transition: report.transition.unwrap_or(MirrorTransition::KeptLastValid),
				cursor: report.cursor,
				field_count,
			})
			.await;
		}
		if let Some(e) = fetch.error {
			self.emit(SyncEvent::SyncFailed {
				stage: SyncStage::DiffPoll,
				error: e.to_string(),
			})
			.await;
		}

		Ok(DiffOutcome::Applied(report))
	}

	/// Report an order that reached the mirror to the delay tracker.
	///
	/// An order is only remembered once it completed a record, so a change-set
	/// seen before its confirmation is reported again when it is re-applied.
	async fn observe_synced_order(&self, tx_order: u64) {
		if self.processed_orders.lock().unwrap().contains(tx_order) {
			return;
		}
		let Some(record) = self.delay_tracker.record_state_sync(tx_order) else {
			return;
		};
		self.processed_orders.lock().unwrap().insert(tx_order);
		self.emit(SyncEvent::TransactionSynced { record }).await;
	}

	fn update_mirror(&self, update: impl FnOnce(&mut MirrorState<T>)) {
		let mut mirror = self.mirror.lock().unwrap();
		update(&mut mirror);
		self.publish(mirror.snapshot());
	}

	/// Notify subscribers only when the snapshot changed.
	fn publish(&self, snapshot: MirrorSnapshot<T>) {
		self.published.send_if_modified(|current| {
			if current.version == snapshot.version {
				return false;
			}
			*current = snapshot;
			true
		});
	}
}
