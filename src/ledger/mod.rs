//! Ledger integration module for Rooch
//!
//! Typed wrappers over the JSON-RPC methods the field sync depends on, plus
//! the wire records they return and their conversion into domain change-sets.

/// Typed RPC method wrappers
mod client;
/// Wire records and domain conversions
mod types;

pub use client::*;
pub use types::*;
