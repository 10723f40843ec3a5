use crate::ledger::LedgerError;

/// Error types for field synchronization
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Ledger error: {0}")]
	LedgerError(#[from] LedgerError),

	#[error("Pagination of {method} stopped after {pages} pages: {reason}")]
	IncompletePagination {
		method: &'static str,
		pages: usize,
		reason: String,
	},

	#[error("Configuration error: {0}")]
	ConfigError(String),
}

/// Coarse state of the sync engine, derived from its in-flight guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
	Idle,
	FullSyncInFlight,
	DiffPollInFlight,
}
