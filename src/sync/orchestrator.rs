//! Field sync service and integration point for all sync components.
//!
//! `FieldSyncService` wires the ledger client, the state root watcher, the
//! sync engine and the delay tracker together and drives them on two
//! independent intervals:
//! - the root watch loop polls the latest transaction and starts a full sync
//!   in the background whenever the root changes
//! - the diff loop applies change-sets since the cursor
//!
//! Consumers read the mirror through a cloneable [`FieldStateHandle`].

use crate::config::SyncConfig;
use crate::ledger::{ExecuteTxRecord, LedgerClient, TransactionWithInfoRecord};
use crate::rpc::RpcTransport;
use crate::sync::delay_tracker::{AverageDelays, DelayRecord, DelayTracker};
use crate::sync::engine::{DiffOutcome, FieldSyncEngine};
use crate::sync::events::{SyncEvent, SyncEventHandler, SyncStage};
use crate::sync::field_decoder::{FieldDecoder, FieldValueDecoder};
use crate::sync::history::list_transactions;
use crate::sync::mirror::{FieldMap, MirrorSnapshot};
use crate::sync::paginate::PagedFetch;
use crate::sync::root_watcher::{RootChange, StateRootWatcher};
use crate::sync::SyncError;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Main field sync service that coordinates all sync components.
pub struct FieldSyncService<T> {
	config: SyncConfig,
	ledger: Arc<LedgerClient>,
	watcher: Arc<StateRootWatcher>,
	engine: Arc<FieldSyncEngine<T>>,
	delay_tracker: Arc<DelayTracker>,
	shutdown: watch::Sender<bool>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> FieldSyncService<T> {
	/// Create a new service.
	///
	/// # Arguments
	/// * `transport` - Transport for every ledger call.
	/// * `decoder` - Decoder for field values.
	/// * `config` - Object id, page size and poll intervals.
	pub fn new(
		transport: Arc<dyn RpcTransport>,
		decoder: Arc<dyn FieldDecoder<T>>,
		config: SyncConfig,
	) -> Result<Self, SyncError> {
		Self::with_delay_tracker(transport, decoder, config, Arc::new(DelayTracker::new()))
	}

	/// Create a new service sharing an existing delay tracker.
	pub fn with_delay_tracker(
		transport: Arc<dyn RpcTransport>,
		decoder: Arc<dyn FieldDecoder<T>>,
		config: SyncConfig,
		delay_tracker: Arc<DelayTracker>,
	) -> Result<Self, SyncError> {
		if config.object_id.trim().is_empty() {
			return Err(SyncError::ConfigError("object_id must not be empty".to_string()));
		}

		let ledger = Arc::new(LedgerClient::new(transport));
		let watcher = Arc::new(StateRootWatcher::new(ledger.clone()));
		let engine = Arc::new(FieldSyncEngine::new(
			config.clone(),
			ledger.clone(),
			FieldValueDecoder::new(decoder),
			delay_tracker.clone(),
		));
		let (shutdown, _) = watch::channel(false);

		Ok(Self {
			config,
			ledger,
			watcher,
			engine,
			delay_tracker,
			shutdown,
			tasks: Mutex::new(Vec::new()),
		})
	}

	pub async fn register_handler(&self, handler: Box<dyn SyncEventHandler>) {
		self.engine.register_handler(handler).await;
	}

	pub fn engine(&self) -> &Arc<FieldSyncEngine<T>> {
		&self.engine
	}

	pub fn handle(&self) -> FieldStateHandle<T> {
		FieldStateHandle {
			mirror: self.engine.subscribe(),
			watcher: self.watcher.clone(),
			delay_tracker: self.delay_tracker.clone(),
		}
	}

	/// Run one root watch step, waiting for any full sync it triggers.
	pub async fn tick_root_watcher(&self) -> Result<RootChange, SyncError> {
		let change = poll_root(&self.watcher, &self.engine).await?;
		react_to_root(&self.engine, &change).await?;
		Ok(change)
	}

	/// Run one diff poll.
	pub async fn tick_diff(&self) -> Result<DiffOutcome, SyncError> {
		self.engine.poll_diff().await
	}

	/// Spawn the root watch and diff loops.
	///
	/// Calling `start` on a running service does nothing.
	pub fn start(&self) {
		let mut tasks = self.tasks.lock().unwrap();
		if !tasks.is_empty() {
			return;
		}
		self.shutdown.send_replace(false);
		info!(
			"Starting field sync of {} (root every {}ms, diff every {}ms)",
			self.config.object_id, self.config.refetch_interval_ms, self.config.diff_interval_ms
		);

		tasks.push(tokio::spawn(root_watch_loop(
			self.watcher.clone(),
			self.engine.clone(),
			self.config.clone(),
			self.shutdown.subscribe(),
		)));
		tasks.push(tokio::spawn(diff_loop(
			self.engine.clone(),
			self.config.clone(),
			self.shutdown.subscribe(),
		)));
	}

	/// Stop scheduling new polls. Work already in flight runs to completion.
	pub fn stop(&self) {
		self.shutdown.send_replace(true);
		let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
		if !tasks.is_empty() {
			info!("Stopping field sync of {}", self.config.object_id);
		}
	}

	pub fn is_running(&self) -> bool {
		!self.tasks.lock().unwrap().is_empty()
	}

	/// Transaction history after `after_order`, paged with the configured page size.
	pub async fn list_transactions(
		&self,
		after_order: Option<u64>,
		descending: bool,
	) -> PagedFetch<TransactionWithInfoRecord> {
		list_transactions(&self.ledger, after_order, self.config.page_size, descending).await
	}

	/// Submit a signed transaction and track its delay until it is mirrored.
	///
	/// # Arguments
	/// * `tx_hex` - The `0x` prefixed transaction bytes.
	///
	/// # Returns
	/// The node's response. The delay record completes once a diff poll
	/// applies the change-set with the returned order.
	pub async fn submit_tracked(&self, tx_hex: &str) -> Result<ExecuteTxRecord, SyncError> {
		let temp_id = self.delay_tracker.start_tracking();
		match self.ledger.execute_raw_transaction(tx_hex).await {
			Ok(response) => {
				self.delay_tracker
					.record_tx_confirm(&temp_id, response.sequence_info.tx_order);
				Ok(response)
			}
			Err(e) => {
				self.delay_tracker.abandon(&temp_id);
				Err(e.into())
			}
		}
	}
}

impl<T> Drop for FieldSyncService<T> {
	fn drop(&mut self) {
		self.shutdown.send_replace(true);
	}
}

/// Poll the latest head, emitting a failure event on error.
async fn poll_root<T: Clone + Send + Sync + 'static>(
	watcher: &StateRootWatcher,
	engine: &FieldSyncEngine<T>,
) -> Result<RootChange, SyncError> {
	match watcher.poll().await {
		Ok(change) => Ok(change),
		Err(e) => {
			warn!("State root poll failed: {}", e);
			engine
				.emit(SyncEvent::SyncFailed {
					stage: SyncStage::RootWatch,
					error: e.to_string(),
				})
				.await;
			Err(e)
		}
	}
}

/// Full sync on a new root, or retry while the mirror lags the latest root.
async fn react_to_root<T: Clone + Send + Sync + 'static>(
	engine: &FieldSyncEngine<T>,
	change: &RootChange,
) -> Result<(), SyncError> {
	match change {
		RootChange::Unchanged(head) if engine.needs_full_sync(&head.state_root) => {
			engine.full_sync(head).await.map(|_| ())
		}
		other => engine.on_root_change(other).await.map(|_| ()),
	}
}

fn wants_full_sync<T: Clone + Send + Sync + 'static>(
	engine: &FieldSyncEngine<T>,
	change: &RootChange,
) -> bool {
	match change {
		RootChange::Unchanged(head) => engine.needs_full_sync(&head.state_root),
		other => other.sync_target().is_some(),
	}
}

async fn root_watch_loop<T: Clone + Send + Sync + 'static>(
	watcher: Arc<StateRootWatcher>,
	engine: Arc<FieldSyncEngine<T>>,
	config: SyncConfig,
	mut shutdown: watch::Receiver<bool>,
) {
	let mut ticker = interval(config.refetch_interval());
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = ticker.tick() => {}
			_ = shutdown.changed() => break,
		}
		if *shutdown.borrow() {
			break;
		}

		let Ok(change) = poll_root(&watcher, &engine).await else {
			continue;
		};
		if !wants_full_sync(&engine, &change) {
			continue;
		}

		// Full syncs run beside the poll so root changes keep being observed.
		let engine = engine.clone();
		tokio::spawn(async move {
			if let Err(e) = react_to_root(&engine, &change).await {
				debug!("Full sync will be retried on the next root poll: {}", e);
			}
		});
	}
	debug!("Root watch loop stopped");
}

async fn diff_loop<T: Clone + Send + Sync + 'static>(
	engine: Arc<FieldSyncEngine<T>>,
	config: SyncConfig,
	mut shutdown: watch::Receiver<bool>,
) {
	let mut ticker = interval(config.diff_interval());
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = ticker.tick() => {}
			_ = shutdown.changed() => break,
		}
		if *shutdown.borrow() {
			break;
		}

		match engine.poll_diff().await {
			Ok(DiffOutcome::Skipped(reason)) => debug!("Diff poll skipped: {:?}", reason),
			Ok(DiffOutcome::Applied(_)) => {}
			Err(e) => warn!("Diff poll failed: {}", e),
		}
	}
	debug!("Diff loop stopped");
}

/// Read access to a synchronized mirror and its delay instrumentation.
pub struct FieldStateHandle<T> {
	mirror: watch::Receiver<MirrorSnapshot<T>>,
	watcher: Arc<StateRootWatcher>,
	delay_tracker: Arc<DelayTracker>,
}

impl<T> Clone for FieldStateHandle<T> {
	fn clone(&self) -> Self {
		Self {
			mirror: self.mirror.clone(),
			watcher: self.watcher.clone(),
			delay_tracker: self.delay_tracker.clone(),
		}
	}
}

impl<T> FieldStateHandle<T> {
	/// Current published fields.
	pub fn mirror(&self) -> Arc<FieldMap<T>> {
		self.mirror.borrow().fields.clone()
	}

	pub fn snapshot(&self) -> MirrorSnapshot<T> {
		self.mirror.borrow().clone()
	}

	/// Latest state root seen on the ledger.
	pub fn state_root(&self) -> Option<String> {
		self.watcher.state_root()
	}

	pub fn is_loading(&self) -> bool {
		self.mirror.borrow().is_loading
	}

	/// Receiver notified on every publish.
	pub fn subscribe(&self) -> watch::Receiver<MirrorSnapshot<T>> {
		self.mirror.clone()
	}

	pub fn start_tracking(&self) -> String {
		self.delay_tracker.start_tracking()
	}

	pub fn record_tx_confirm(&self, temp_id: &str, tx_order: u64) -> bool {
		self.delay_tracker.record_tx_confirm(temp_id, tx_order)
	}

	pub fn record_state_sync(&self, tx_order: u64) -> Option<DelayRecord> {
		self.delay_tracker.record_state_sync(tx_order)
	}

	pub fn recent_delays(&self) -> Vec<DelayRecord> {
		self.delay_tracker.recent_delays()
	}

	pub fn average_delays(&self) -> Option<AverageDelays> {
		self.delay_tracker.average_delays()
	}
}
