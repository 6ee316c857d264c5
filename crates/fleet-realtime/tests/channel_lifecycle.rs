//! Connection lifecycle of the realtime channel against the in-memory transport.
//!
//! All tests run on a paused clock, so keep-alive and reconnect timing is
//! exact.

use fleet_realtime::testing::{MockConnector, MockServer};
use fleet_realtime::{
    ChannelConfig, ChannelMessage, ChannelState, RealtimeChannel, SessionTokens, StaticToken,
    TokenProvider, WebSocketMessage,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn channel_with(tokens: Arc<dyn TokenProvider>, config: ChannelConfig) -> (RealtimeChannel, MockConnector) {
    let connector = MockConnector::new();
    let channel = RealtimeChannel::with_connector(config, tokens, Arc::new(connector.clone()))
        .expect("valid config");
    (channel, connector)
}

fn logged_in() -> (RealtimeChannel, MockConnector) {
    channel_with(Arc::new(StaticToken::new("abc")), ChannelConfig::default())
}

/// Let spawned session tasks run to their next await point
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

async fn open(channel: &RealtimeChannel, connector: &MockConnector) -> MockServer {
    channel.connect();
    settle().await;
    assert_eq!(channel.state(), ChannelState::Open);
    connector.next_server().expect("handshake completed")
}

fn is_close(frame: &WebSocketMessage) -> bool {
    frame.is_close()
}

#[tokio::test(start_paused = true)]
async fn connect_without_token_opens_nothing() {
    let (channel, connector) = channel_with(Arc::new(StaticToken::none()), ChannelConfig::default());

    channel.connect();
    settle().await;

    assert_eq!(connector.attempts(), 0);
    assert_eq!(channel.state(), ChannelState::Idle);
    assert!(!channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn connect_uses_token_in_query() {
    let (channel, connector) = logged_in();
    let server = open(&channel, &connector).await;

    assert_eq!(server.url().as_str(), "ws://localhost:8000/ws?token=abc");
    assert_eq!(server.token().as_deref(), Some("abc"));
    assert!(channel.is_connected());
    assert_eq!(channel.stats().connections_opened, 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_connect_opens_one_socket() {
    let (channel, connector) = logged_in();

    channel.connect();
    channel.connect();
    assert_eq!(channel.state(), ChannelState::Connecting);
    settle().await;

    channel.connect();
    settle().await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(channel.stats().connection_attempts, 1);
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_keep_alive_and_retries() {
    let (channel, connector) = logged_in();
    let mut server = open(&channel, &connector).await;

    channel.disconnect();
    assert!(!channel.is_connected());
    assert_eq!(channel.state(), ChannelState::Idle);

    settle().await;
    let frames = server.sent();
    assert_eq!(frames.len(), 1);
    assert!(is_close(&frames[0]));

    sleep(Duration::from_secs(60)).await;
    assert!(server.sent().is_empty());
    assert_eq!(connector.attempts(), 1);
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[tokio::test(start_paused = true)]
async fn disconnect_when_idle_is_harmless() {
    let (channel, connector) = logged_in();

    channel.disconnect();
    channel.disconnect();

    assert_eq!(channel.state(), ChannelState::Idle);
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn keep_alive_pings_on_interval() {
    let (channel, connector) = logged_in();
    let mut server = open(&channel, &connector).await;

    sleep(Duration::from_secs(29)).await;
    assert!(server.sent().is_empty());

    sleep(Duration::from_secs(2)).await;
    assert_eq!(server.sent_json(), vec![json!({"type": "ping"})]);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(server.sent_json(), vec![json!({"type": "ping"})]);
    assert_eq!(channel.stats().keep_alives_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn busy_inbound_does_not_starve_keep_alive_or_sends() {
    let config = ChannelConfig::default().with_keep_alive_interval(Duration::from_millis(50));
    let (channel, connector) = channel_with(Arc::new(StaticToken::new("abc")), config);
    let server = Arc::new(Mutex::new(open(&channel, &connector).await));
    let flooding = Arc::new(AtomicBool::new(true));

    // Every telemetry frame pushes the next one, so inbound is never idle
    {
        let server = Arc::clone(&server);
        let flooding = Arc::clone(&flooding);
        channel.subscribe("telemetry", move |_: &ChannelMessage| {
            if flooding.load(Ordering::SeqCst) {
                server.lock().push_json(&json!({"type": "telemetry"}));
            }
        });
    }
    server.lock().push_json(&json!({"type": "telemetry"}));

    tokio::time::advance(Duration::from_millis(60)).await;
    assert!(channel.send(&json!({"type": "subscribe_device", "device_id": "dev-42"})));
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    let stats = channel.stats();
    assert!(stats.messages_received > 0);
    assert!(stats.keep_alives_sent >= 1);
    assert_eq!(stats.messages_sent, 1);

    flooding.store(false, Ordering::SeqCst);
    let sent = server.lock().sent_json();
    assert!(sent.contains(&json!({"type": "ping"})));
    assert!(sent.contains(&json!({"type": "subscribe_device", "device_id": "dev-42"})));
}

#[tokio::test(start_paused = true)]
async fn unplanned_drop_reconnects_after_delay() {
    let (channel, connector) = logged_in();
    let server = open(&channel, &connector).await;

    drop(server);
    settle().await;
    assert_eq!(channel.state(), ChannelState::Reconnecting);
    assert!(!channel.is_connected());

    sleep(Duration::from_secs(2)).await;
    assert_eq!(connector.attempts(), 1);

    sleep(Duration::from_millis(1100)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(channel.state(), ChannelState::Open);
    assert!(channel.is_connected());
    assert!(connector.next_server().is_some());
}

#[tokio::test(start_paused = true)]
async fn server_close_frame_triggers_reconnect() {
    let (channel, connector) = logged_in();
    let server = open(&channel, &connector).await;

    server.push_close();
    settle().await;
    assert_eq!(channel.state(), ChannelState::Reconnecting);

    sleep(Duration::from_millis(3100)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test(start_paused = true)]
async fn transport_error_triggers_reconnect() {
    let (channel, connector) = logged_in();
    let server = open(&channel, &connector).await;

    server.push_error(fleet_realtime::ChannelError::Protocol("reset".to_string()));
    settle().await;

    assert_eq!(channel.state(), ChannelState::Reconnecting);
}

#[tokio::test(start_paused = true)]
async fn failed_handshake_is_retried() {
    let (channel, connector) = logged_in();
    connector.fail_next(1);

    channel.connect();
    settle().await;
    assert_eq!(channel.state(), ChannelState::Reconnecting);
    assert_eq!(connector.attempts(), 1);

    sleep(Duration::from_millis(3100)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_is_retried() {
    let config = ChannelConfig::default().with_connect_timeout(Duration::from_secs(5));
    let (channel, connector) = channel_with(Arc::new(StaticToken::new("abc")), config);
    connector.hold_handshakes();

    channel.connect();
    sleep(Duration::from_millis(5100)).await;
    assert_eq!(channel.state(), ChannelState::Reconnecting);

    connector.release_handshakes();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_handshake_closes_socket_once_open() {
    let (channel, connector) = logged_in();
    connector.hold_handshakes();

    channel.connect();
    settle().await;
    assert_eq!(channel.state(), ChannelState::Connecting);

    channel.disconnect();
    connector.release_handshakes();
    settle().await;

    let mut server = connector.next_server().expect("handshake completed late");
    let frames = server.sent();
    assert!(frames.iter().any(is_close));
    assert_eq!(channel.state(), ChannelState::Idle);
    assert!(!channel.is_connected());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(server.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn connect_while_reconnecting_connects_immediately() {
    let (channel, connector) = logged_in();
    let server = open(&channel, &connector).await;

    drop(server);
    settle().await;
    assert_eq!(channel.state(), ChannelState::Reconnecting);

    channel.connect();
    settle().await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(channel.state(), ChannelState::Open);

    // The cancelled timer must not open a third socket
    sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_picks_up_new_token() {
    let tokens = Arc::new(SessionTokens::new());
    tokens.set_token("old");
    let (channel, connector) = channel_with(tokens.clone(), ChannelConfig::default());

    let first = open(&channel, &connector).await;
    assert_eq!(first.token().as_deref(), Some("old"));

    tokens.set_token("new");
    channel.reconnect();
    settle().await;

    let second = connector.next_server().expect("second connection");
    assert_eq!(second.token().as_deref(), Some("new"));
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test(start_paused = true)]
async fn retry_after_logout_goes_idle() {
    let tokens = Arc::new(SessionTokens::new());
    tokens.set_token("abc");
    let (channel, connector) = channel_with(tokens.clone(), ChannelConfig::default());
    let server = open(&channel, &connector).await;

    drop(server);
    tokens.clear();
    sleep(Duration::from_millis(3100)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[tokio::test(start_paused = true)]
async fn exponential_backoff_doubles_until_open() {
    let config = ChannelConfig {
        backoff_jitter: 0.0,
        ..ChannelConfig::default().with_max_reconnect_delay(Duration::from_secs(20))
    };
    let (channel, connector) = channel_with(Arc::new(StaticToken::new("abc")), config);
    connector.fail_next(3);

    channel.connect();
    settle().await;
    assert_eq!(connector.attempts(), 1);

    // Retries at 3s, 3+6s and 9+12s
    sleep(Duration::from_millis(3100)).await;
    assert_eq!(connector.attempts(), 2);
    sleep(Duration::from_secs(6)).await;
    assert_eq!(connector.attempts(), 3);
    sleep(Duration::from_secs(11)).await;
    assert_eq!(connector.attempts(), 3);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(connector.attempts(), 4);
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test(start_paused = true)]
async fn dropping_last_handle_closes_connection() {
    let (channel, connector) = logged_in();
    let mut server = open(&channel, &connector).await;

    drop(channel);
    settle().await;

    assert!(server.sent().iter().any(is_close));
    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
}
