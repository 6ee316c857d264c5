//! In-memory transport for exercising the channel without a server
//!
//! [`MockConnector`] records every connection attempt and hands the test a
//! [`MockServer`] per successful handshake, through which frames can be
//! pushed to the channel and the frames it wrote can be inspected.

use crate::transport::{Connector, Transport};
use crate::types::{ChannelError, ChannelResult, WebSocketMessage};
use async_trait::async_trait;
use futures_util::{sink, stream};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use url::Url;

#[derive(Default)]
struct MockState {
    urls: Vec<Url>,
    servers: VecDeque<MockServer>,
    failures_pending: usize,
}

/// Connector that opens in-memory connections
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    handshake_gate: Arc<watch::Sender<bool>>,
}

impl MockConnector {
    pub fn new() -> Self {
        let (handshake_gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            handshake_gate: Arc::new(handshake_gate),
        }
    }

    /// Number of connection attempts so far
    pub fn attempts(&self) -> usize {
        self.state.lock().urls.len()
    }

    /// URLs of every attempt, oldest first
    pub fn urls(&self) -> Vec<Url> {
        self.state.lock().urls.clone()
    }

    /// Make the next `count` attempts fail their handshake
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures_pending += count;
    }

    /// Keep handshakes pending until [`MockConnector::release_handshakes`]
    pub fn hold_handshakes(&self) {
        self.handshake_gate.send_replace(false);
    }

    pub fn release_handshakes(&self) {
        self.handshake_gate.send_replace(true);
    }

    /// Server end of the oldest connection not yet taken
    pub fn next_server(&self) -> Option<MockServer> {
        self.state.lock().servers.pop_front()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> ChannelResult<Transport> {
        let fail = {
            let mut state = self.state.lock();
            state.urls.push(url.clone());
            if state.failures_pending > 0 {
                state.failures_pending -= 1;
                true
            } else {
                false
            }
        };

        let mut gate = self.handshake_gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(ChannelError::ConnectionClosed);
        }

        if fail {
            return Err(ChannelError::Connection("handshake refused".to_string()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        self.state.lock().servers.push_back(MockServer {
            url: url.clone(),
            inbound: inbound_tx,
            outbound: outbound_rx,
        });

        let sink = sink::unfold(
            outbound_tx,
            |tx: mpsc::UnboundedSender<WebSocketMessage>, frame: WebSocketMessage| async move {
                tx.send(frame).map_err(|_| ChannelError::ConnectionClosed)?;
                Ok::<_, ChannelError>(tx)
            },
        );
        let stream = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });

        Ok(Transport::new(sink, stream))
    }
}

/// Server side of one in-memory connection.
///
/// Dropping it ends the client's inbound stream, which the channel sees as
/// an unplanned close.
pub struct MockServer {
    url: Url,
    inbound: mpsc::UnboundedSender<ChannelResult<WebSocketMessage>>,
    outbound: mpsc::UnboundedReceiver<WebSocketMessage>,
}

impl MockServer {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Bearer token the client presented
    pub fn token(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Ok(WebSocketMessage::text(text)));
    }

    pub fn push_json(&self, value: &Value) {
        self.push_text(value.to_string());
    }

    pub fn push_binary(&self, data: impl Into<Vec<u8>>) {
        let _ = self.inbound.send(Ok(WebSocketMessage::binary(data)));
    }

    /// Close from the server side with a close frame
    pub fn push_close(&self) {
        let _ = self.inbound.send(Ok(WebSocketMessage::close_with_reason(1001, "going away")));
    }

    /// Fail the client's inbound stream with a transport error
    pub fn push_error(&self, error: ChannelError) {
        let _ = self.inbound.send(Err(error));
    }

    /// Every frame the client wrote since the last call
    pub fn sent(&mut self) -> Vec<WebSocketMessage> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Text frames the client wrote since the last call, decoded as JSON
    pub fn sent_json(&mut self) -> Vec<Value> {
        self.sent()
            .iter()
            .filter_map(WebSocketMessage::as_text)
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }
}
