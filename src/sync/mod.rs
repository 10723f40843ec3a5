//! Field Synchronization Module
//!
//! This module keeps a local mirror of one object's dynamic fields in step with the ledger.
//! It is composed of several submodules, each responsible for a specific aspect of the sync process:
//!
//! - `orchestrator`: The service that wires all components together and drives the poll loops.
//! - `engine`: Full sync on root change, diff polling in between, and the guard between the two.
//! - `mirror`: The mirror state machine: authoritative replacement and best-effort merge.
//! - `root_watcher`: Detects state root changes from the latest ledger transaction.
//! - `full_sync`: Fetches every field of the object at a given state root.
//! - `history`: Lists ledger transactions by order.
//! - `paginate`: Cursor-following pagination shared by all listings.
//! - `field_decoder`: Turns hex encoded field values into typed records.
//! - `delay_tracker`: Measures send, confirm and sync delays of submitted transactions.
//! - `events`: Event types and handlers for observing the sync lifecycle.

/// Round-trip delay instrumentation
pub mod delay_tracker;
/// Full sync and diff sync engine
pub mod engine;
/// Event system for observing sync progress
pub mod events;
/// Field value decoding
pub mod field_decoder;
/// Complete field listing at a state root
pub mod full_sync;
/// Transaction history listing
pub mod history;
/// Mirror state machine
pub mod mirror;
/// Service wiring and poll loops
pub mod orchestrator;
/// Cursor-following pagination
pub mod paginate;
/// State root change detection
pub mod root_watcher;
/// Sync errors and phases
mod types;

pub use orchestrator::*;
pub use types::*;
