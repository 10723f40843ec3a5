//! Local mirror of an object's fields.
//!
//! The mirror moves between two kinds of update:
//! - an authoritative replacement from a complete full sync, which also
//!   rebases the diff cursor on the new state root
//! - a best-effort merge of applied change-sets, subject to the configured
//!   [`EmptyDiffPolicy`]
//!
//! Consumers only ever read the published map. It is swapped as a whole, so
//! a reader never sees a half-applied change-set.

use crate::config::EmptyDiffPolicy;
use crate::ledger::FieldKey;
use std::collections::HashMap;
use std::sync::Arc;

pub type FieldMap<T> = HashMap<FieldKey, T>;

/// How the mirror was last updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorTransition {
	/// Replaced by a complete full sync.
	AuthoritativeReplace,
	/// A merged candidate was published.
	BestEffortMerge,
	/// The candidate was rejected and the last valid map republished.
	KeptLastValid,
}

/// Immutable view of the mirror handed to consumers.
#[derive(Debug)]
pub struct MirrorSnapshot<T> {
	pub fields: Arc<FieldMap<T>>,
	/// Root the last authoritative replacement was taken at.
	pub synced_root: Option<String>,
	/// First tx order the next diff poll will ask for.
	pub cursor: Option<u64>,
	pub is_loading: bool,
	/// Bumped on every publish.
	pub version: u64,
}

impl<T> Clone for MirrorSnapshot<T> {
	fn clone(&self) -> Self {
		Self {
			fields: self.fields.clone(),
			synced_root: self.synced_root.clone(),
			cursor: self.cursor,
			is_loading: self.is_loading,
			version: self.version,
		}
	}
}

impl<T> Default for MirrorSnapshot<T> {
	fn default() -> Self {
		Self {
			fields: Arc::new(HashMap::new()),
			synced_root: None,
			cursor: None,
			is_loading: false,
			version: 0,
		}
	}
}

/// Mutable mirror state owned by the sync engine.
pub struct MirrorState<T> {
	published: Arc<FieldMap<T>>,
	last_valid: Arc<FieldMap<T>>,
	synced_root: Option<String>,
	cursor: Option<u64>,
	is_loading: bool,
	/// Bumped on every authoritative replacement.
	epoch: u64,
	version: u64,
	policy: EmptyDiffPolicy,
}

impl<T: Clone> MirrorState<T> {
	pub fn new(policy: EmptyDiffPolicy) -> Self {
		Self {
			published: Arc::new(HashMap::new()),
			last_valid: Arc::new(HashMap::new()),
			synced_root: None,
			cursor: None,
			is_loading: false,
			epoch: 0,
			version: 0,
			policy,
		}
	}

	pub fn cursor(&self) -> Option<u64> {
		self.cursor
	}

	pub fn epoch(&self) -> u64 {
		self.epoch
	}

	pub fn synced_root(&self) -> Option<&str> {
		self.synced_root.as_deref()
	}

	pub fn published(&self) -> &Arc<FieldMap<T>> {
		&self.published
	}

	pub fn set_loading(&mut self, loading: bool) {
		self.is_loading = loading;
		self.version += 1;
	}

	/// Replace the mirror with a complete snapshot taken at `state_root`.
	///
	/// The diff cursor restarts at `tx_order`, the order that produced the root.
	/// An empty snapshot is published as is.
	pub fn replace_authoritative(&mut self, fields: FieldMap<T>, state_root: String, tx_order: u64) {
		let fields = Arc::new(fields);
		self.published = fields.clone();
		self.last_valid = fields;
		self.synced_root = Some(state_root);
		self.cursor = Some(tx_order);
		self.is_loading = false;
		self.epoch += 1;
		self.version += 1;
	}

	/// Copy of the last valid map to apply a change-set onto.
	pub fn working_copy(&self) -> FieldMap<T> {
		(*self.last_valid).clone()
	}

	/// Publish `candidate` if the policy accepts it.
	///
	/// `applied_ops` counts the operations of the change-set that took effect.
	pub fn merge_best_effort(&mut self, candidate: FieldMap<T>, applied_ops: usize) -> MirrorTransition {
		let accepted = applied_ops > 0
			&& match self.policy {
				EmptyDiffPolicy::PublishNetEmpty => true,
				EmptyDiffPolicy::KeepLastValid => !candidate.is_empty(),
			};

		if !accepted {
			self.republish_last_valid();
			return MirrorTransition::KeptLastValid;
		}

		let candidate = Arc::new(candidate);
		self.published = candidate.clone();
		self.last_valid = candidate;
		self.version += 1;
		MirrorTransition::BestEffortMerge
	}

	pub fn republish_last_valid(&mut self) {
		if !Arc::ptr_eq(&self.published, &self.last_valid) {
			self.published = self.last_valid.clone();
			self.version += 1;
		}
	}

	/// Move the cursor past `tx_order` if it is at or beyond the cursor.
	pub fn advance_cursor_past(&mut self, tx_order: u64) {
		if let Some(cursor) = self.cursor {
			if tx_order >= cursor {
				self.cursor = Some(tx_order.saturating_add(1));
				self.version += 1;
			}
		}
	}

	pub fn snapshot(&self) -> MirrorSnapshot<T> {
		MirrorSnapshot {
			fields: self.published.clone(),
			synced_root: self.synced_root.clone(),
			cursor: self.cursor,
			is_loading: self.is_loading,
			version: self.version,
		}
	}
}
