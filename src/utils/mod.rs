//!
//! Utility module for field sync.
//!
//! Re-exports hex and formatting helpers used throughout the codebase.
/// Hex decoding and display formatting helpers
pub mod index;

pub use index::{decode_hex, format_delay, strip_hex_prefix};
