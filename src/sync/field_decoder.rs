use crate::ledger::FieldKey;
use crate::utils::decode_hex;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{error, warn};

/// Error types for field value decoding
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
	#[error("Failed to decode hex: {0}")]
	HexError(#[from] hex::FromHexError),

	#[error("Failed to deserialize value: {0}")]
	DeserializeError(#[from] bincode::Error),

	#[error("Invalid value: {0}")]
	InvalidValue(String),
}

/// Turns the binary value of a field into the caller's record type.
pub trait FieldDecoder<T>: Send + Sync {
	fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError>;
}

impl<T, F> FieldDecoder<T> for F
where
	F: Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync,
{
	fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError> {
		self(bytes)
	}
}

/// Decodes values laid out in bincode's default encoding.
pub struct BincodeDecoder<T> {
	_record: PhantomData<fn() -> T>,
}

impl<T> BincodeDecoder<T> {
	pub fn new() -> Self {
		Self {
			_record: PhantomData,
		}
	}
}

impl<T> Default for BincodeDecoder<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: DeserializeOwned> FieldDecoder<T> for BincodeDecoder<T> {
	fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError> {
		Ok(bincode::deserialize(bytes)?)
	}
}

/// Keeps the raw value bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytesDecoder;

impl FieldDecoder<Vec<u8>> for RawBytesDecoder {
	fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
		Ok(bytes.to_vec())
	}
}

/// Applies a [`FieldDecoder`] to hex encoded wire values.
///
/// A value that fails to decode is logged and skipped; it never fails the
/// surrounding sync.
pub struct FieldValueDecoder<T> {
	inner: Arc<dyn FieldDecoder<T>>,
}

impl<T> Clone for FieldValueDecoder<T> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<T> FieldValueDecoder<T> {
	pub fn new(inner: Arc<dyn FieldDecoder<T>>) -> Self {
		Self { inner }
	}

	/// Parse a `0x` prefixed hex value into `T`
	pub fn parse_value(&self, hex_value: &str) -> Result<T, DecodeError> {
		let bytes = decode_hex(hex_value).map_err(|e| {
			error!("[DECODE_FIELD] Failed to decode hex: {}", e);
			e
		})?;
		self.inner.decode(&bytes).map_err(|e| {
			error!("[DECODE_FIELD] Failed to decode field value: {}", e);
			e
		})
	}

	/// Decode the value of `key`, or `None` if it is malformed.
	pub fn decode_field(&self, key: &FieldKey, hex_value: &str) -> Option<T> {
		match self.parse_value(hex_value) {
			Ok(value) => Some(value),
			Err(e) => {
				warn!("Skipping field {}: {}", key, e);
				None
			}
		}
	}
}
