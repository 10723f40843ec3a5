//! Event system for field synchronization.
//!
//! The engine and the service emit [`SyncEvent`]s for every lifecycle step:
//! root changes, full syncs, applied diffs, observed transactions and
//! failures. Registered [`SyncEventHandler`]s receive them in order, which
//! keeps logging and application reactions out of the sync logic.

use crate::sync::SyncError;
use crate::sync::delay_tracker::DelayRecord;
use crate::sync::mirror::MirrorTransition;
use crate::utils::format_delay;
use tracing::{info, warn};

/// Events that occur during field synchronization
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The ledger's latest state root changed (or was first observed)
    RootChanged {
        previous: Option<String>,
        state_root: String,
        tx_order: u64,
    },
    /// A full sync replaced the mirror
    FullSyncCompleted {
        state_root: String,
        tx_order: u64,
        field_count: usize,
    },
    /// A diff poll processed change-sets
    DiffApplied {
        change_sets: usize,
        applied_ops: usize,
        transition: MirrorTransition,
        cursor: u64,
        field_count: usize,
    },
    /// A tracked transaction reached the mirror
    TransactionSynced { record: DelayRecord },
    /// A sync step failed; the mirror keeps its last valid content
    SyncFailed { stage: SyncStage, error: String },
}

/// Sync step an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    RootWatch,
    FullSync,
    DiffPoll,
}

/// Trait for handling sync events.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
pub struct EventDispatcher {
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, event: &SyncEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Logs every event through `tracing`.
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LoggingEventHandler {
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
        match event {
            SyncEvent::RootChanged {
                previous,
                state_root,
                tx_order,
            } => match previous {
                Some(previous) => info!(
                    "State root changed {} -> {} at order {}",
                    previous, state_root, tx_order
                ),
                None => info!("Initial state root {} at order {}", state_root, tx_order),
            },
            SyncEvent::FullSyncCompleted {
                state_root,
                tx_order,
                field_count,
            } => info!(
                "Full sync at {} (order {}): {} fields",
                state_root, tx_order, field_count
            ),
            SyncEvent::DiffApplied {
                change_sets,
                applied_ops,
                transition,
                cursor,
                field_count,
            } => info!(
                "Applied {} change-sets ({} ops, {:?}), cursor {}, {} fields",
                change_sets, applied_ops, transition, cursor, field_count
            ),
            SyncEvent::TransactionSynced { record } => info!(
                "Transaction {} synced: total {}, confirm {}, sync {}",
                record.tx_order,
                format_delay(record.total_delay),
                format_delay(record.confirm_delay()),
                format_delay(record.sync_delay)
            ),
            SyncEvent::SyncFailed { stage, error } => {
                warn!("{:?} failed: {}", stage, error)
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}
