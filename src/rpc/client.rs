//!
//! WebSocket JSON-RPC client with request multiplexing and reconnection.
//!
//! One background task owns the socket. Callers hand it frames through a
//! per-session channel and wait on a oneshot registered in the pending table
//! under the request id. When the socket drops, the task reconnects with a
//! linear backoff; once attempts are exhausted, or after `disconnect()`, every
//! pending request is rejected.

use super::types::*;
use super::{RpcTransport, websocket_url};
use crate::config::TransportConfig;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Capacity of the notification broadcast channel.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

type Responder = oneshot::Sender<Result<Value, TransportError>>;

/// A request awaiting its response.
struct PendingRequest {
	responder: Responder,
	method: String,
	params: Value,
	submitted_at: Instant,
}

/// State shared between the public handle and the connection task.
struct Shared {
	url: String,
	pending: Mutex<HashMap<u64, PendingRequest>>,
	/// Outgoing frame channel of the live session, `None` while disconnected.
	outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
	state: watch::Sender<ConnectionState>,
	notifications: broadcast::Sender<RpcNotification>,
	next_id: AtomicU64,
	reconnect_attempts: AtomicU32,
}

impl Shared {
	fn set_state(&self, next: ConnectionState) {
		self.state.send_if_modified(|current| {
			// An intentional disconnect is final
			if *current == ConnectionState::Disconnected || *current == next {
				return false;
			}
			*current = next;
			true
		});
	}

	fn install_outgoing(&self, sender: mpsc::UnboundedSender<Message>) {
		*self.outgoing.lock().unwrap() = Some(sender);
		self.set_state(ConnectionState::Connected);
	}

	fn clear_outgoing(&self) {
		self.outgoing.lock().unwrap().take();
	}

	fn reject_all(&self, make_error: impl Fn() -> TransportError) {
		let drained: Vec<(u64, PendingRequest)> = self.pending.lock().unwrap().drain().collect();
		if !drained.is_empty() {
			warn!("Rejecting {} pending requests: {}", drained.len(), make_error());
		}
		for (id, request) in drained {
			debug!(
				"Rejecting request {} ({} {}) pending for {:?}",
				id,
				request.method,
				request.params,
				request.submitted_at.elapsed()
			);
			let _ = request.responder.send(Err(make_error()));
		}
	}

	fn handle_text(&self, text: &str) {
		let frame: IncomingFrame = match serde_json::from_str(text) {
			Ok(frame) => frame,
			Err(e) => {
				error!("Failed to parse WebSocket message: {}", e);
				return;
			}
		};

		match frame.classify() {
			ServerMessage::Response { id, outcome } => {
				let request = self.pending.lock().unwrap().remove(&id);
				match request {
					Some(request) => {
						debug!(
							"Response for request {} ({}) after {:?}",
							id,
							request.method,
							request.submitted_at.elapsed()
						);
						let _ = request
							.responder
							.send(outcome.map_err(TransportError::from));
					}
					None => debug!("Dropping response for unknown request id {}", id),
				}
			}
			ServerMessage::Notification(notification) => {
				debug!("Received notification {}", notification.method);
				// No subscribers is not an error
				let _ = self.notifications.send(notification);
			}
			ServerMessage::Unrecognized => {
				debug!("Ignoring unrecognized message: {}", text);
			}
		}
	}
}

/// How a connected session ended.
enum SessionEnd {
	Shutdown,
	Closed(String),
}

/// WebSocket JSON-RPC client
///
/// Construction spawns the connection task, so it must happen inside a Tokio
/// runtime. Dropping the client stops the task.
pub struct WsRpcClient {
	shared: Arc<Shared>,
	config: TransportConfig,
	shutdown: watch::Sender<bool>,
}

impl WsRpcClient {
	/// Create a new client and start connecting.
	///
	/// # Arguments
	/// * `config` - Endpoint and reconnection settings.
	///
	/// # Returns
	/// The client handle, or `TransportError::InvalidConfig` if the settings
	/// are rejected. Connection failures are handled by the reconnect loop and
	/// observable through [`WsRpcClient::state`].
	pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
		config.validate()?;
		let url = websocket_url(&config.url)?;

		let (state, _) = watch::channel(ConnectionState::Connecting);
		let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
		let shared = Arc::new(Shared {
			url,
			pending: Mutex::new(HashMap::new()),
			outgoing: Mutex::new(None),
			state,
			notifications,
			next_id: AtomicU64::new(0),
			reconnect_attempts: AtomicU32::new(0),
		});

		let (shutdown, shutdown_rx) = watch::channel(false);
		tokio::spawn(connection_loop(shared.clone(), config.clone(), shutdown_rx));

		Ok(Self {
			shared,
			config,
			shutdown,
		})
	}

	/// Send a request and wait for the matching response.
	///
	/// Fails immediately with `NotConnected` while the socket is down;
	/// callers decide whether to retry.
	pub async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
		let sender = self
			.shared
			.outgoing
			.lock()
			.unwrap()
			.clone()
			.ok_or(TransportError::NotConnected)?;

		let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
		let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, &params))?;

		let (responder, response) = oneshot::channel();
		self.shared.pending.lock().unwrap().insert(
			id,
			PendingRequest {
				responder,
				method: method.to_string(),
				params,
				submitted_at: Instant::now(),
			},
		);

		if sender.send(Message::Text(frame)).is_err() {
			self.shared.pending.lock().unwrap().remove(&id);
			return Err(TransportError::NotConnected);
		}
		debug!("Sent request {} ({})", id, method);

		let outcome = match self.config.request_timeout() {
			Some(limit) => match tokio::time::timeout(limit, response).await {
				Ok(outcome) => outcome,
				Err(_) => {
					self.shared.pending.lock().unwrap().remove(&id);
					warn!("Request {} ({}) timed out after {:?}", id, method, limit);
					return Err(TransportError::Timeout {
						method: method.to_string(),
						elapsed_ms: limit.as_millis(),
					});
				}
			},
			None => response.await,
		};

		// A dropped responder means the connection task went away
		outcome.unwrap_or(Err(TransportError::Disconnected))
	}

	/// Close the socket and reject every pending request.
	///
	/// No reconnection is attempted afterwards.
	pub fn disconnect(&self) {
		info!("Disconnecting from {}", self.shared.url);
		let _ = self.shutdown.send(true);
		self.shared.clear_outgoing();
		self.shared.set_state(ConnectionState::Disconnected);
		self.shared.reject_all(|| TransportError::Disconnected);
	}

	/// Wait until the connection is open.
	///
	/// Returns an error if the connection reaches a terminal state or is not
	/// ready within `timeout`.
	pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), TransportError> {
		let mut state = self.shared.state.subscribe();
		let reached = tokio::time::timeout(
			timeout,
			state.wait_for(|s| s.is_connected() || s.is_terminal()),
		)
		.await
		.map_err(|_| TransportError::ConnectTimeout(timeout.as_millis()))?
		.map(|s| *s)
		.map_err(|_| TransportError::Disconnected)?;

		match reached {
			ConnectionState::Connected => Ok(()),
			ConnectionState::Failed => Err(TransportError::ReconnectExhausted {
				attempts: self.shared.reconnect_attempts.load(Ordering::SeqCst),
			}),
			_ => Err(TransportError::Disconnected),
		}
	}

	/// Current connection state.
	pub fn state(&self) -> ConnectionState {
		*self.shared.state.borrow()
	}

	/// Watch connection state transitions.
	pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
		self.shared.state.subscribe()
	}

	/// Receive server-pushed notifications.
	pub fn subscribe_notifications(&self) -> broadcast::Receiver<RpcNotification> {
		self.shared.notifications.subscribe()
	}

	/// Number of requests still waiting for a response.
	pub fn pending_requests(&self) -> usize {
		self.shared.pending.lock().unwrap().len()
	}

	/// The WebSocket URL actually dialled.
	pub fn url(&self) -> &str {
		&self.shared.url
	}
}

impl Drop for WsRpcClient {
	fn drop(&mut self) {
		let _ = self.shutdown.send(true);
	}
}

#[async_trait::async_trait]
impl RpcTransport for WsRpcClient {
	async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
		WsRpcClient::request(self, method, params).await
	}
}

/// Connect, serve the session, and reconnect until shut down or exhausted.
async fn connection_loop(
	shared: Arc<Shared>,
	config: TransportConfig,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		if *shutdown.borrow() {
			return;
		}

		debug!("Attempting WebSocket connection to: {}", shared.url);
		let connected = tokio::select! {
			result = connect_async(shared.url.as_str()) => result,
			_ = shutdown.changed() => return,
		};

		match connected {
			Ok((stream, response)) => {
				info!(
					"WebSocket connection established to {}, response status: {}",
					shared.url,
					response.status()
				);
				shared.reconnect_attempts.store(0, Ordering::SeqCst);
				match run_session(&shared, &config, stream, &mut shutdown).await {
					SessionEnd::Shutdown => return,
					SessionEnd::Closed(reason) => {
						error!("websocket_close: {}", reason);
					}
				}
			}
			Err(e) => {
				error!("websocket_error: connection to {} failed: {}", shared.url, e);
			}
		}

		shared.clear_outgoing();
		if *shutdown.borrow() {
			return;
		}

		let attempts = shared.reconnect_attempts.load(Ordering::SeqCst);
		if attempts >= config.max_reconnect_attempts {
			error!(
				"WebSocket connection failed after maximum reconnection attempts ({})",
				attempts
			);
			shared.reject_all(|| TransportError::ReconnectExhausted { attempts });
			shared.set_state(ConnectionState::Failed);
			return;
		}

		let attempt = attempts + 1;
		shared.reconnect_attempts.store(attempt, Ordering::SeqCst);
		shared.set_state(ConnectionState::Reconnecting { attempt });

		let delay = config.reconnect_delay() * attempt;
		info!(
			"Reconnecting in {:?} (attempt {}/{})",
			delay, attempt, config.max_reconnect_attempts
		);
		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = shutdown.changed() => return,
		}
	}
}

/// Pump frames in both directions until the socket closes or shutdown is requested.
async fn run_session(
	shared: &Shared,
	config: &TransportConfig,
	stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
	shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
	let (mut ws_sender, mut ws_receiver) = stream.split();

	if *shutdown.borrow() {
		let _ = ws_sender.send(Message::Close(None)).await;
		return SessionEnd::Shutdown;
	}

	let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel();
	shared.install_outgoing(outgoing);

	let heartbeat_enabled = config.heartbeat_interval().is_some();
	let heartbeat_period = config
		.heartbeat_interval()
		.unwrap_or(Duration::from_secs(3600));
	let mut heartbeat =
		tokio::time::interval_at(tokio::time::Instant::now() + heartbeat_period, heartbeat_period);
	let pong_timeout = config.heartbeat_timeout();
	let pong_deadline = tokio::time::sleep(heartbeat_period);
	tokio::pin!(pong_deadline);
	let mut awaiting_pong = false;

	loop {
		tokio::select! {
			incoming = ws_receiver.next() => {
				match incoming {
					Some(Ok(Message::Text(text))) => shared.handle_text(&text),
					Some(Ok(Message::Pong(_))) => {
						awaiting_pong = false;
					}
					Some(Ok(Message::Close(frame))) => {
						let reason = frame
							.map(|f| format!("{} {}", f.code, f.reason))
							.unwrap_or_else(|| "closed by server".to_string());
						return SessionEnd::Closed(reason);
					}
					Some(Ok(_)) => {
						debug!("Ignoring non-text WebSocket frame");
					}
					Some(Err(e)) => return SessionEnd::Closed(e.to_string()),
					None => return SessionEnd::Closed("stream ended".to_string()),
				}
			}
			Some(frame) = outgoing_rx.recv() => {
				if let Err(e) = ws_sender.send(frame).await {
					return SessionEnd::Closed(format!("send failed: {}", e));
				}
			}
			_ = heartbeat.tick(), if heartbeat_enabled => {
				if awaiting_pong {
					warn!("No pong received within timeout, triggering reconnection");
					return SessionEnd::Closed("heartbeat timeout".to_string());
				}
				awaiting_pong = true;
				if let Err(e) = ws_sender.send(Message::Ping(Vec::new())).await {
					return SessionEnd::Closed(format!("failed to send ping: {}", e));
				}
				if let Some(timeout) = pong_timeout {
					pong_deadline.as_mut().reset(tokio::time::Instant::now() + timeout);
				}
			}
			_ = &mut pong_deadline, if awaiting_pong && pong_timeout.is_some() => {
				warn!(
					"No pong received within {:?}, triggering reconnection",
					pong_timeout.unwrap_or_default()
				);
				return SessionEnd::Closed("heartbeat timeout".to_string());
			}
			_ = shutdown.changed() => {
				let _ = ws_sender.send(Message::Close(None)).await;
				return SessionEnd::Shutdown;
			}
		}
	}
}
