use rooch_field_sync::sync::events::LoggingEventHandler;
use rooch_field_sync::sync::field_decoder::RawBytesDecoder;
use rooch_field_sync::utils::format_delay;
use rooch_field_sync::{AppConfig, FieldSyncService, WsRpcClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config = match AppConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return;
		}
	};

	info!("Starting field sync service");

	let client = match WsRpcClient::new(config.transport.clone()) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			error!("Failed to create RPC client: {}", e);
			return;
		}
	};

	if let Err(e) = client.wait_until_connected(Duration::from_secs(10)).await {
		error!("Failed to connect to {}: {}", client.url(), e);
		return;
	}

	info!("Connected to {}", client.url());

	let service = match FieldSyncService::<Vec<u8>>::new(
		client.clone(),
		Arc::new(RawBytesDecoder),
		config.sync.clone(),
	) {
		Ok(service) => service,
		Err(e) => {
			error!("Failed to create field sync service: {}", e);
			return;
		}
	};
	service.register_handler(Box::new(LoggingEventHandler)).await;

	let handle = service.handle();
	let mut updates = handle.subscribe();
	service.start();

	loop {
		tokio::select! {
			changed = updates.changed() => {
				if changed.is_err() {
					break;
				}
				let snapshot = updates.borrow_and_update().clone();
				if !snapshot.is_loading {
					info!(
						"Mirror v{}: {} fields, cursor {:?}",
						snapshot.version,
						snapshot.fields.len(),
						snapshot.cursor
					);
				}
			}
			_ = tokio::signal::ctrl_c() => {
				info!("Shutting down");
				break;
			}
		}
	}

	service.stop();
	client.disconnect();

	for record in handle.recent_delays() {
		info!(
			"Order {}: total {}, sync {}",
			record.tx_order,
			format_delay(record.total_delay),
			format_delay(record.sync_delay)
		);
	}
}
