//! Round-trip delay tracking for submitted transactions.
//!
//! A transaction is tracked from the moment it is sent, through the
//! confirmation that assigns its tx order, until a diff poll observes a
//! change-set with that order. Each completed track becomes a
//! [`DelayRecord`]; the most recent ones are kept for display.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Number of completed records kept by [`DelayTracker`].
pub const DELAY_HISTORY_CAPACITY: usize = 5;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Delays measured for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayRecord {
	pub tx_order: u64,
	pub send_time: DateTime<Utc>,
	pub confirm_time: DateTime<Utc>,
	pub sync_time: DateTime<Utc>,
	/// Send to sync.
	pub total_delay: Duration,
	/// Confirm to sync.
	pub sync_delay: Duration,
}

impl DelayRecord {
	/// Send to confirm.
	pub fn confirm_delay(&self) -> Duration {
		self.total_delay.saturating_sub(self.sync_delay)
	}
}

/// Mean delays over the kept records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AverageDelays {
	pub samples: usize,
	pub total_delay: Duration,
	pub confirm_delay: Duration,
	pub sync_delay: Duration,
}

#[derive(Debug, Clone)]
struct PendingTransaction {
	send_time: DateTime<Utc>,
	confirm: Option<(u64, DateTime<Utc>)>,
}

#[derive(Default)]
struct TrackerState {
	pending: HashMap<String, PendingTransaction>,
	/// tx order -> temp id, for confirmed transactions awaiting sync
	by_order: HashMap<u64, String>,
	/// Most recent first
	history: VecDeque<DelayRecord>,
}

/// Tracks send, confirm and sync times of submitted transactions
pub struct DelayTracker {
	clock: Arc<dyn Clock>,
	state: Mutex<TrackerState>,
}

impl Default for DelayTracker {
	fn default() -> Self {
		Self::new()
	}
}

impl DelayTracker {
	pub fn new() -> Self {
		Self::with_clock(Arc::new(SystemClock))
	}

	pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
		Self {
			clock,
			state: Mutex::new(TrackerState::default()),
		}
	}

	/// Start tracking a transaction about to be sent.
	///
	/// Returns the temporary id to confirm it with.
	pub fn start_tracking(&self) -> String {
		let mut bytes = [0u8; 8];
		rand::rng().fill(&mut bytes);
		let temp_id = format!("tx_{}", hex::encode(bytes));

		let send_time = self.clock.now();
		self.state.lock().unwrap().pending.insert(
			temp_id.clone(),
			PendingTransaction {
				send_time,
				confirm: None,
			},
		);
		debug!("Tracking transaction {}", temp_id);
		temp_id
	}

	/// Record that the tracked transaction was confirmed with `tx_order`.
	///
	/// Returns false if `temp_id` is not being tracked.
	pub fn record_tx_confirm(&self, temp_id: &str, tx_order: u64) -> bool {
		let confirm_time = self.clock.now();
		let mut state = self.state.lock().unwrap();
		let Some(pending) = state.pending.get_mut(temp_id) else {
			warn!("Confirm for untracked transaction {}", temp_id);
			return false;
		};
		if let Some((previous, _)) = pending.confirm.replace((tx_order, confirm_time)) {
			state.by_order.remove(&previous);
		}
		state.by_order.insert(tx_order, temp_id.to_string());
		debug!("Transaction {} confirmed at order {}", temp_id, tx_order);
		true
	}

	/// Record that a change-set with `tx_order` reached the mirror.
	///
	/// Completes the record of the transaction confirmed with that order.
	/// Orders without a confirmed transaction are ignored.
	pub fn record_state_sync(&self, tx_order: u64) -> Option<DelayRecord> {
		let sync_time = self.clock.now();
		let mut state = self.state.lock().unwrap();
		let temp_id = state.by_order.remove(&tx_order)?;
		let pending = state.pending.remove(&temp_id)?;
		let (_, confirm_time) = pending.confirm?;

		let sync_delay = elapsed(confirm_time, sync_time);
		let total_delay = elapsed(pending.send_time, sync_time).max(sync_delay);
		let record = DelayRecord {
			tx_order,
			send_time: pending.send_time,
			confirm_time,
			sync_time,
			total_delay,
			sync_delay,
		};

		state.history.push_front(record.clone());
		state.history.truncate(DELAY_HISTORY_CAPACITY);
		Some(record)
	}

	/// Completed records, most recent first.
	pub fn recent_delays(&self) -> Vec<DelayRecord> {
		self.state.lock().unwrap().history.iter().cloned().collect()
	}

	pub fn average_delays(&self) -> Option<AverageDelays> {
		let state = self.state.lock().unwrap();
		let samples = state.history.len();
		if samples == 0 {
			return None;
		}

		let total: Duration = state.history.iter().map(|r| r.total_delay).sum();
		let sync: Duration = state.history.iter().map(|r| r.sync_delay).sum();
		let confirm: Duration = state.history.iter().map(DelayRecord::confirm_delay).sum();
		let n = samples as u32;
		Some(AverageDelays {
			samples,
			total_delay: total / n,
			confirm_delay: confirm / n,
			sync_delay: sync / n,
		})
	}

	/// Transactions started but not yet synced.
	pub fn pending_count(&self) -> usize {
		self.state.lock().unwrap().pending.len()
	}

	/// Stop tracking a transaction that will never be confirmed.
	pub fn abandon(&self, temp_id: &str) {
		let mut state = self.state.lock().unwrap();
		if let Some(pending) = state.pending.remove(temp_id) {
			if let Some((order, _)) = pending.confirm {
				state.by_order.remove(&order);
			}
		}
	}
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
	(to - from).to_std().unwrap_or(Duration::ZERO)
}
