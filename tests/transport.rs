use futures_util::{SinkExt, StreamExt};
use rooch_field_sync::config::TransportConfig;
use rooch_field_sync::rpc::{ConnectionState, TransportError, WsRpcClient};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

type ServerStream = WebSocketStream<TcpStream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve every accepted connection with `handler`.
async fn serve<F, Fut>(handler: F) -> String
where
    F: Fn(ServerStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = accept_async(stream).await {
                tokio::spawn(handler(ws));
            }
        }
    });
    url
}

fn config(url: &str) -> TransportConfig {
    let mut config = TransportConfig::new(url);
    config.reconnect_delay_ms = 10;
    config.heartbeat_interval_ms = None;
    config
}

async fn connected_client(config: TransportConfig) -> Arc<WsRpcClient> {
    let client = Arc::new(WsRpcClient::new(config).expect("valid config"));
    client
        .wait_until_connected(CONNECT_TIMEOUT)
        .await
        .expect("connected");
    client
}

async fn next_request(ws: &mut ServerStream) -> Option<Value> {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).ok();
        }
    }
    None
}

fn reply(request: &Value, result: Value) -> Message {
    Message::Text(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }).to_string())
}

/// Answers `ping` with `pong` and echoes the params of anything else.
async fn echo(mut ws: ServerStream) {
    while let Some(request) = next_request(&mut ws).await {
        let result = if request["method"] == "ping" {
            json!("pong")
        } else {
            request["params"].clone()
        };
        if ws.send(reply(&request, result)).await.is_err() {
            break;
        }
    }
}

/// Reads requests and never answers.
async fn silent(mut ws: ServerStream) {
    while next_request(&mut ws).await.is_some() {}
}

/// Completes the handshake and then never reads, so pings go unanswered.
async fn mute(ws: ServerStream) {
    tokio::time::sleep(Duration::from_secs(30)).await;
    drop(ws);
}

/// Serve with `handler`, counting accepted connections.
async fn serve_counted<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(ServerStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let accepted = Arc::new(AtomicUsize::new(0));
    let url = serve({
        let accepted = accepted.clone();
        move |ws: ServerStream| {
            accepted.fetch_add(1, Ordering::SeqCst);
            handler(ws)
        }
    })
    .await;
    (url, accepted)
}

async fn wait_for_connections(accepted: &AtomicUsize, count: usize) {
    tokio::time::timeout(CONNECT_TIMEOUT, async {
        while accepted.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connections accepted");
}

/// Free local address nobody listens on.
async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}

#[tokio::test]
async fn test_ping_pong() {
    let url = serve(echo).await;
    let client = connected_client(config(&url)).await;

    assert_eq!(client.state(), ConnectionState::Connected);
    let result = client.request("ping", json!([])).await.unwrap();
    assert_eq!(result, json!("pong"));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_out_of_order_responses_are_correlated() {
    let url = serve(|mut ws: ServerStream| async move {
        let first = next_request(&mut ws).await.unwrap();
        let second = next_request(&mut ws).await.unwrap();
        ws.send(reply(&second, second["params"].clone())).await.unwrap();
        ws.send(reply(&first, first["params"].clone())).await.unwrap();
        silent(ws).await;
    })
    .await;
    let client = connected_client(config(&url)).await;

    let (first, second) = tokio::join!(
        client.request("echo", json!(["first"])),
        client.request("echo", json!(["second"]))
    );
    assert_eq!(first.unwrap(), json!(["first"]));
    assert_eq!(second.unwrap(), json!(["second"]));
}

#[tokio::test]
async fn test_stray_frames_are_dropped() {
    let url = serve(|mut ws: ServerStream| async move {
        let request = next_request(&mut ws).await.unwrap();
        ws.send(Message::Text("not json".to_string())).await.unwrap();
        ws.send(Message::Text(
            json!({ "jsonrpc": "2.0", "id": 999, "result": "stray" }).to_string(),
        ))
        .await
        .unwrap();
        ws.send(reply(&request, json!("answer"))).await.unwrap();
        echo(ws).await;
    })
    .await;
    let client = connected_client(config(&url)).await;

    assert_eq!(client.request("first", json!([])).await.unwrap(), json!("answer"));
    // The connection survived the malformed frames
    assert_eq!(client.request("ping", json!([])).await.unwrap(), json!("pong"));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_error_response() {
    let url = serve(|mut ws: ServerStream| async move {
        while let Some(request) = next_request(&mut ws).await {
            let error = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": { "code": -32000, "message": "object not found" }
            });
            ws.send(Message::Text(error.to_string())).await.unwrap();
        }
    })
    .await;
    let client = connected_client(config(&url)).await;

    match client.request("rooch_getStates", json!(["0x1"])).await {
        Err(TransportError::Rpc { code, message }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "object not found");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_notifications_are_forwarded() {
    let url = serve(|mut ws: ServerStream| async move {
        let request = next_request(&mut ws).await.unwrap();
        ws.send(reply(&request, json!("sub-1"))).await.unwrap();
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "rooch_subscribeEvents",
            "params": { "subscription": "sub-1", "result": { "event_seq": "3" } }
        });
        ws.send(Message::Text(notification.to_string())).await.unwrap();
        silent(ws).await;
    })
    .await;
    let client = connected_client(config(&url)).await;
    let mut notifications = client.subscribe_notifications();

    let subscription = client
        .request("rooch_subscribeEvents", json!([{}]))
        .await
        .unwrap();
    assert_eq!(subscription, json!("sub-1"));

    let notification = tokio::time::timeout(CONNECT_TIMEOUT, notifications.recv())
        .await
        .expect("notification in time")
        .expect("channel open");
    assert_eq!(notification.method, "rooch_subscribeEvents");
    assert_eq!(notification.params["result"]["event_seq"], "3");
}

#[tokio::test]
async fn test_request_timeout_clears_pending() {
    let url = serve(silent).await;
    let mut config = config(&url);
    config.request_timeout_ms = Some(100);
    let client = connected_client(config).await;

    let result = client.request("rooch_syncStates", json!([])).await;
    assert!(matches!(result, Err(TransportError::Timeout { ref method, .. }) if method == "rooch_syncStates"));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_disconnect_rejects_pending() {
    let url = serve(silent).await;
    let client = connected_client(config(&url)).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("rooch_listFieldStates", json!([])).await }
    });
    while client.pending_requests() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    client.disconnect();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(TransportError::Disconnected)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.request("ping", json!([])).await,
        Err(TransportError::NotConnected)
    ));

    // Stays down: no reconnection after an explicit disconnect
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_exhaustion_rejects_pending() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(listener);
        let mut ws = accept_async(stream).await.unwrap();
        next_request(&mut ws).await;
        // Drop the socket without answering; the port is closed from now on
    });

    let mut config = config(&url);
    config.max_reconnect_attempts = 2;
    config.request_timeout_ms = None;
    let client = connected_client(config).await;

    let result = client.request("rooch_syncStates", json!([])).await;
    assert!(matches!(
        result,
        Err(TransportError::ReconnectExhausted { attempts: 2 })
    ));
    assert_eq!(client.state(), ConnectionState::Failed);
    assert_eq!(client.pending_requests(), 0);
    assert!(matches!(
        client.request("ping", json!([])).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let url = serve({
        let accepted = accepted.clone();
        move |mut ws: ServerStream| {
            let connection = accepted.fetch_add(1, Ordering::SeqCst);
            async move {
                if connection == 0 {
                    let _ = ws.close(None).await;
                } else {
                    echo(ws).await;
                }
            }
        }
    })
    .await;

    let mut config = config(&url);
    config.max_reconnect_attempts = 3;
    let client = Arc::new(WsRpcClient::new(config).expect("valid config"));

    tokio::time::timeout(CONNECT_TIMEOUT, async {
        while accepted.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reconnected");
    client
        .wait_until_connected(CONNECT_TIMEOUT)
        .await
        .expect("connected");

    assert_eq!(client.request("ping", json!([])).await.unwrap(), json!("pong"));
}

#[tokio::test]
async fn test_unreachable_endpoint_fails() {
    let mut config = config(&closed_url().await);
    config.max_reconnect_attempts = 0;
    let client = WsRpcClient::new(config).expect("valid config");

    let result = client.wait_until_connected(CONNECT_TIMEOUT).await;
    assert!(matches!(
        result,
        Err(TransportError::ReconnectExhausted { attempts: 0 })
    ));
    assert_eq!(client.state(), ConnectionState::Failed);
    assert!(matches!(
        client.request("ping", json!([])).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_invalid_reconnect_limit_is_rejected() {
    let mut config = config("ws://127.0.0.1:1");
    config.max_reconnect_attempts = 11;
    assert!(matches!(
        WsRpcClient::new(config),
        Err(TransportError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_http_url_is_upgraded() {
    let url = serve(echo).await;
    let http_url = url.replacen("ws://", "http://", 1);
    let client = connected_client(config(&http_url)).await;

    assert_eq!(client.url(), url);
    assert_eq!(client.request("ping", json!([])).await.unwrap(), json!("pong"));
}

#[tokio::test]
async fn test_missing_pong_triggers_reconnect() {
    let (url, accepted) = serve_counted(mute).await;
    let mut config = config(&url);
    config.heartbeat_interval_ms = Some(100);
    config.heartbeat_timeout_ms = Some(50);
    let client = connected_client(config).await;

    wait_for_connections(&accepted, 2).await;
    client
        .wait_until_connected(CONNECT_TIMEOUT)
        .await
        .expect("connected");
    assert!(matches!(
        client.state(),
        ConnectionState::Connected | ConnectionState::Reconnecting { .. }
    ));
}

#[tokio::test]
async fn test_unanswered_ping_without_deadline_waits_for_next_tick() {
    let (url, accepted) = serve_counted(mute).await;
    let mut config = config(&url);
    config.heartbeat_interval_ms = Some(200);
    config.heartbeat_timeout_ms = None;
    let _client = connected_client(config).await;

    // Not before the second tick finds the first ping unanswered
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    wait_for_connections(&accepted, 2).await;
}

#[tokio::test]
async fn test_answered_heartbeat_keeps_connection() {
    let (url, accepted) = serve_counted(echo).await;
    let mut config = config(&url);
    config.heartbeat_interval_ms = Some(50);
    config.heartbeat_timeout_ms = Some(500);
    let client = connected_client(config).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.request("ping", json!([])).await.unwrap(), json!("pong"));
}
