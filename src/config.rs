//! Configuration for the transport and the field sync service.
//!
//! Every struct has a `Default` suitable for a local node and derives
//! `Deserialize`, so embedding applications can load it from their own config
//! files. The binary reads [`AppConfig::from_env`].

use serde::Deserialize;
use std::time::Duration;

use crate::rpc::TransportError;

/// Upper bound on reconnect attempts accepted by [`TransportConfig::validate`].
pub const MAX_RECONNECT_ATTEMPTS_LIMIT: u32 = 10;

/// Settings for the WebSocket JSON-RPC transport
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
	/// Endpoint URL. `http(s)://` is upgraded to `ws(s)://`.
	pub url: String,
	/// Base reconnect delay; attempt `n` waits `n * reconnect_delay_ms`.
	pub reconnect_delay_ms: u64,
	/// Consecutive failed connections tolerated before giving up.
	pub max_reconnect_attempts: u32,
	/// Per-request timeout. `None` waits until the connection fails.
	pub request_timeout_ms: Option<u64>,
	/// Interval between ping frames. `None` disables the heartbeat.
	pub heartbeat_interval_ms: Option<u64>,
	/// Time to wait for the pong of a ping before dropping the session.
	/// `None` waits until the next ping is due.
	pub heartbeat_timeout_ms: Option<u64>,
}

impl Default for TransportConfig {
	fn default() -> Self {
		Self {
			url: "http://localhost:6767".to_string(),
			reconnect_delay_ms: 1000,
			max_reconnect_attempts: 5,
			request_timeout_ms: Some(30_000),
			heartbeat_interval_ms: Some(30_000),
			heartbeat_timeout_ms: Some(5_000),
		}
	}
}

impl TransportConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			..Self::default()
		}
	}

	pub fn reconnect_delay(&self) -> Duration {
		Duration::from_millis(self.reconnect_delay_ms)
	}

	pub fn request_timeout(&self) -> Option<Duration> {
		self.request_timeout_ms.map(Duration::from_millis)
	}

	pub fn heartbeat_interval(&self) -> Option<Duration> {
		self.heartbeat_interval_ms
			.filter(|ms| *ms > 0)
			.map(Duration::from_millis)
	}

	pub fn heartbeat_timeout(&self) -> Option<Duration> {
		self.heartbeat_timeout_ms
			.filter(|ms| *ms > 0)
			.map(Duration::from_millis)
	}

	/// Reject settings the transport cannot honour.
	pub fn validate(&self) -> Result<(), TransportError> {
		if self.max_reconnect_attempts > MAX_RECONNECT_ATTEMPTS_LIMIT {
			return Err(TransportError::InvalidConfig(format!(
				"max_reconnect_attempts must be between 0 and {}, got {}",
				MAX_RECONNECT_ATTEMPTS_LIMIT, self.max_reconnect_attempts
			)));
		}
		if self.url.trim().is_empty() {
			return Err(TransportError::InvalidConfig(
				"url must not be empty".to_string(),
			));
		}
		Ok(())
	}
}

/// What a diff poll publishes when its change-sets leave nothing usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyDiffPolicy {
	/// Publish any candidate in which at least one operation took effect,
	/// including one whose net result is empty.
	#[default]
	PublishNetEmpty,
	/// Only publish non-empty candidates; an empty candidate republishes the
	/// last valid mirror.
	KeepLastValid,
}

/// Settings for the field sync service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Object whose dynamic fields are mirrored.
	pub object_id: String,
	/// Page size for every paginated listing.
	pub page_size: usize,
	/// Latest-transaction poll interval of the state root watcher.
	pub refetch_interval_ms: u64,
	/// Change-set poll interval of the diff engine.
	pub diff_interval_ms: u64,
	/// Number of tx orders remembered for sync-observed deduplication.
	pub processed_orders_capacity: usize,
	pub empty_diff_policy: EmptyDiffPolicy,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			object_id: String::new(),
			page_size: 100,
			refetch_interval_ms: 3000,
			diff_interval_ms: 1000,
			processed_orders_capacity: 100,
			empty_diff_policy: EmptyDiffPolicy::default(),
		}
	}
}

impl SyncConfig {
	pub fn new(object_id: impl Into<String>) -> Self {
		Self {
			object_id: object_id.into(),
			..Self::default()
		}
	}

	pub fn refetch_interval(&self) -> Duration {
		Duration::from_millis(self.refetch_interval_ms.max(1))
	}

	pub fn diff_interval(&self) -> Duration {
		Duration::from_millis(self.diff_interval_ms.max(1))
	}
}

/// Configuration of the command line mirror.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
	pub transport: TransportConfig,
	pub sync: SyncConfig,
}

impl AppConfig {
	/// Load configuration from environment variables.
	///
	/// Required:
	/// - `ROOCH_OBJECT_ID`: object whose fields are mirrored
	///
	/// Optional:
	/// - `ROOCH_RPC_URL`: RPC endpoint (default: "http://localhost:6767")
	/// - `ROOCH_PAGE_SIZE`: page size for listings (default: 100)
	/// - `ROOCH_REFETCH_INTERVAL_MS`: state root poll interval (default: 3000)
	/// - `ROOCH_DIFF_INTERVAL_MS`: change-set poll interval (default: 1000)
	/// - `ROOCH_MAX_RECONNECT_ATTEMPTS`: reconnect attempts, 0-10 (default: 5)
	/// - `ROOCH_HEARTBEAT_TIMEOUT_MS`: pong deadline after each ping (default: 5000)
	pub fn from_env() -> Result<Self, String> {
		let object_id = std::env::var("ROOCH_OBJECT_ID")
			.map_err(|_| "ROOCH_OBJECT_ID must be set".to_string())?;

		let mut transport = TransportConfig::default();
		if let Ok(url) = std::env::var("ROOCH_RPC_URL") {
			transport.url = url.trim_end_matches('/').to_string();
		}
		if let Some(attempts) = parse_env("ROOCH_MAX_RECONNECT_ATTEMPTS")? {
			transport.max_reconnect_attempts = attempts;
		}
		if let Some(timeout) = parse_env("ROOCH_HEARTBEAT_TIMEOUT_MS")? {
			transport.heartbeat_timeout_ms = Some(timeout);
		}

		let mut sync = SyncConfig::new(object_id);
		if let Some(page_size) = parse_env("ROOCH_PAGE_SIZE")? {
			sync.page_size = page_size;
		}
		if let Some(interval) = parse_env("ROOCH_REFETCH_INTERVAL_MS")? {
			sync.refetch_interval_ms = interval;
		}
		if let Some(interval) = parse_env("ROOCH_DIFF_INTERVAL_MS")? {
			sync.diff_interval_ms = interval;
		}

		Ok(Self { transport, sync })
	}
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
	match std::env::var(name) {
		Ok(raw) => raw
			.trim()
			.parse::<T>()
			.map(Some)
			.map_err(|_| format!("{} has an invalid value: {}", name, raw)),
		Err(_) => Ok(None),
	}
}
