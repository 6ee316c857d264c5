//! The realtime event channel
//!
//! One authenticated WebSocket connection to the fleet event server, kept
//! alive with pings, reopened after unplanned drops and fanned out to
//! subscribers by message type.
//!
//! Lifecycle:
//!
//! ```text
//! Idle ──connect()──▶ Connecting ──handshake ok──▶ Open
//!   ▲                     │                          │
//!   │                  failure                  unplanned close
//!   │                     ▼                          │
//!   │                Reconnecting ◀──────────────────┘
//!   │                     │ delay elapsed
//!   │                     └──────────▶ Connecting
//!   └──────────── disconnect() from any state
//! ```
//!
//! Every session carries a generation number. `disconnect()` bumps the
//! generation, so late handshakes and stale reconnect timers see they no
//! longer own the channel and stand down.

use super::message::ChannelMessage;
use super::registry::{SubscriberRegistry, Subscription, Topic};
use super::session::{run_session, SessionContext};
use super::stats::{ChannelStats, StatsCounters};
use crate::auth::TokenProvider;
use crate::config::ChannelConfig;
use crate::transport::{redacted, Connector, TungsteniteConnector};
use crate::types::{ChannelResult, ChannelState, WebSocketMessage};
use fleet_core::AppConfigTrait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handle to the realtime channel. Clones share the same connection.
///
/// When the last handle is dropped the connection is closed and no
/// reconnect is attempted.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

pub(super) struct ChannelInner {
    config: ChannelConfig,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
    registry: SubscriberRegistry,
    connected: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    last_message: RwLock<Option<ChannelMessage>>,
    stats: StatsCounters,
}

struct Lifecycle {
    state: ChannelState,
    generation: u64,
    session: Option<SessionHandle>,
    reconnect: Option<JoinHandle<()>>,
    retry_attempt: u32,
}

struct SessionHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<WebSocketMessage>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    /// Planned close: the session task closes the socket, immediately if
    /// open or as soon as a pending handshake completes.
    fn close(self) {
        self.shutdown.cancel();
    }
}

impl RealtimeChannel {
    /// Channel over the tokio-tungstenite connector
    pub fn new(config: ChannelConfig, tokens: Arc<dyn TokenProvider>) -> ChannelResult<Self> {
        let connector =
            TungsteniteConnector::new().with_max_message_size(config.max_message_size);
        Self::with_connector(config, tokens, Arc::new(connector))
    }

    /// Channel over a custom connector
    pub fn with_connector(
        config: ChannelConfig,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
    ) -> ChannelResult<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(ChannelInner {
                config,
                tokens,
                connector,
                registry: SubscriberRegistry::new(),
                connected: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle {
                    state: ChannelState::Idle,
                    generation: 0,
                    session: None,
                    reconnect: None,
                    retry_attempt: 0,
                }),
                last_message: RwLock::new(None),
                stats: StatsCounters::default(),
            }),
        })
    }

    /// Open the connection.
    ///
    /// No-op while a connection is opening or open. Without a token nothing
    /// is opened. A pending reconnect is cancelled and replaced by an
    /// immediate attempt. Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the connection and cancel keep-alive and any pending reconnect.
    ///
    /// The channel reports disconnected as soon as this returns; the socket
    /// itself is closed in the background.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Disconnect, then connect with whatever token is current now
    pub fn reconnect(&self) {
        self.inner.disconnect();
        self.inner.connect();
    }

    /// Serialize `payload` and transmit it if the connection is open.
    ///
    /// Best effort: while not open the payload is dropped, never queued.
    /// Returns whether the payload was handed to the socket.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        self.inner.send(payload)
    }

    /// Register `callback` for messages of `topic`. Use `"*"` or
    /// [`Topic::Any`] for every message.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, callback: F) -> Subscription
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(topic, callback)
    }

    /// Whether the socket is open
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lifecycle.lock().state
    }

    /// Most recently decoded inbound message
    pub fn last_message(&self) -> Option<ChannelMessage> {
        self.inner.last_message.read().clone()
    }

    pub fn stats(&self) -> ChannelStats {
        self.inner.stats.snapshot()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.inner.registry
    }
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("state", &self.state())
            .field("api_base_url", &self.inner.config.api_base_url)
            .field("subscribers", &self.inner.registry.len())
            .finish()
    }
}

impl ChannelInner {
    fn connect(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            ChannelState::Connecting | ChannelState::Open => {
                debug!(state = %lifecycle.state, "connect() ignored, connection already active");
                return;
            }
            ChannelState::Reconnecting => {
                if let Some(timer) = lifecycle.reconnect.take() {
                    timer.abort();
                }
            }
            ChannelState::Idle => {}
        }
        lifecycle.retry_attempt = 0;
        self.open_session(&mut lifecycle);
    }

    fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.generation += 1;
        if let Some(timer) = lifecycle.reconnect.take() {
            timer.abort();
        }
        if let Some(session) = lifecycle.session.take() {
            info!(generation = session.generation, "Closing realtime connection");
            session.close();
        }
        lifecycle.state = ChannelState::Idle;
        lifecycle.retry_attempt = 0;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Dropping realtime payload that failed to serialize");
                return false;
            }
        };

        let lifecycle = self.lifecycle.lock();
        match (&lifecycle.state, &lifecycle.session) {
            (ChannelState::Open, Some(session)) => {
                session.outbound.send(WebSocketMessage::Text(text)).is_ok()
            }
            _ => {
                debug!(state = %lifecycle.state, "Dropping realtime payload, channel not open");
                false
            }
        }
    }

    /// Start a session for the current token. Caller holds the lifecycle lock.
    fn open_session(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        let Some(token) = self.tokens.token() else {
            info!("No bearer token available, realtime channel stays disconnected");
            self.go_idle(lifecycle);
            return;
        };

        let url = match self.config.websocket_url(&token) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Cannot build realtime URL");
                self.go_idle(lifecycle);
                return;
            }
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!("Realtime channel needs a Tokio runtime to connect");
                self.go_idle(lifecycle);
                return;
            }
        };

        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        StatsCounters::bump(&self.stats.connection_attempts);
        debug!(generation, url = %redacted(&url), "Opening realtime connection");

        runtime.spawn(run_session(SessionContext {
            channel: Arc::downgrade(self),
            generation,
            url,
            connector: Arc::clone(&self.connector),
            connect_timeout: self.config.connect_timeout(),
            keep_alive: self.config.keep_alive_interval(),
            outbound: outbound_rx,
            shutdown: shutdown.clone(),
        }));

        lifecycle.session = Some(SessionHandle {
            generation,
            outbound: outbound_tx,
            shutdown,
        });
        lifecycle.state = ChannelState::Connecting;
    }

    fn go_idle(&self, lifecycle: &mut Lifecycle) {
        lifecycle.state = ChannelState::Idle;
        lifecycle.session = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Handshake finished. Returns false when the session was torn down in
    /// the meantime and must close right away.
    pub(super) fn session_opened(&self, generation: u64) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.owns(generation) {
            return false;
        }
        lifecycle.state = ChannelState::Open;
        lifecycle.retry_attempt = 0;
        self.connected.store(true, Ordering::SeqCst);
        StatsCounters::bump(&self.stats.connections_opened);
        info!(generation, "Realtime connection open");
        true
    }

    /// A session ended without `disconnect()`: schedule a retry.
    pub(super) fn session_closed(self: &Arc<Self>, generation: u64, reason: &str) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.owns(generation) {
            return;
        }
        lifecycle.session = None;
        self.connected.store(false, Ordering::SeqCst);

        let delay = self.config.reconnect_policy().delay_for(lifecycle.retry_attempt);
        lifecycle.retry_attempt = lifecycle.retry_attempt.saturating_add(1);
        lifecycle.state = ChannelState::Reconnecting;

        warn!(
            generation,
            reason,
            retry_in_ms = delay.as_millis() as u64,
            "Realtime connection lost, scheduling reconnect"
        );

        let channel = Arc::downgrade(self);
        let timer_generation = lifecycle.generation;
        lifecycle.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(channel) = channel.upgrade() {
                channel.reconnect_due(timer_generation);
            }
        }));
    }

    fn reconnect_due(self: &Arc<Self>, generation: u64) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation || lifecycle.state != ChannelState::Reconnecting {
            return;
        }
        lifecycle.reconnect = None;
        debug!(attempt = lifecycle.retry_attempt, "Reconnecting realtime channel");
        self.open_session(&mut lifecycle);
    }

    /// Decode an inbound payload and fan it out
    pub(super) fn handle_inbound(&self, decoded: Result<ChannelMessage, serde_json::Error>) {
        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                StatsCounters::bump(&self.stats.decode_failures);
                warn!(error = %e, "Dropping malformed realtime message");
                return;
            }
        };

        StatsCounters::bump(&self.stats.messages_received);
        *self.last_message.write() = Some(message.clone());

        let failures = self.registry.dispatch(&message);
        if failures > 0 {
            StatsCounters::add(&self.stats.subscriber_failures, failures as u64);
        }
    }

    pub(super) fn stats(&self) -> &StatsCounters {
        &self.stats
    }
}

impl Lifecycle {
    fn owns(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.generation == generation)
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if let Some(timer) = lifecycle.reconnect.take() {
            timer.abort();
        }
        if let Some(session) = lifecycle.session.take() {
            session.close();
        }
    }
}

pub(super) type WeakChannel = Weak<ChannelInner>;
