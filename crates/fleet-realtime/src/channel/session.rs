//! Per-connection task: handshake, keep-alive, inbound dispatch, outbound writes

use super::message::{ping, ChannelMessage};
use super::realtime::WeakChannel;
use super::stats::StatsCounters;
use crate::transport::{Connector, FrameSink, Transport};
use crate::types::{ChannelError, WebSocketMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub(super) struct SessionContext {
    pub channel: WeakChannel,
    pub generation: u64,
    pub url: Url,
    pub connector: Arc<dyn Connector>,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub outbound: mpsc::UnboundedReceiver<WebSocketMessage>,
    pub shutdown: CancellationToken,
}

enum SessionEnd {
    /// `disconnect()` or the channel was dropped
    Planned,
    /// Peer closed, transport error or failed write
    Lost(String),
}

pub(super) async fn run_session(ctx: SessionContext) {
    let SessionContext {
        channel,
        generation,
        url,
        connector,
        connect_timeout,
        keep_alive,
        mut outbound,
        shutdown,
    } = ctx;

    // The handshake is not raced against `shutdown`: a socket that is still
    // opening is closed once the handshake completes.
    let transport = match time::timeout(connect_timeout, connector.connect(&url)).await {
        Ok(Ok(transport)) => transport,
        Ok(Err(e)) => {
            warn!(generation, error = %e, "Realtime connection failed");
            lost(&channel, generation, &e.to_string());
            return;
        }
        Err(_) => {
            let e = ChannelError::Timeout(connect_timeout);
            warn!(generation, error = %e, "Realtime connection failed");
            lost(&channel, generation, &e.to_string());
            return;
        }
    };

    let Transport {
        mut sink,
        mut stream,
    } = transport;

    let opened = channel
        .upgrade()
        .is_some_and(|channel| channel.session_opened(generation));
    if !opened {
        debug!(generation, "Connection finished opening after teardown, closing it");
        close_transport(&mut sink).await;
        return;
    }

    let mut keep_alive_timer = time::interval_at(Instant::now() + keep_alive, keep_alive);
    keep_alive_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            // Inbound is polled last so a busy server cannot starve
            // keep-alive or caller sends.
            biased;

            _ = shutdown.cancelled() => break SessionEnd::Planned,

            _ = keep_alive_timer.tick() => {
                let frame = WebSocketMessage::Text(ping().to_string());
                if let Err(e) = sink.send(frame).await {
                    break SessionEnd::Lost(format!("keep-alive failed: {}", e));
                }
                if let Some(channel) = channel.upgrade() {
                    StatsCounters::bump(&channel.stats().keep_alives_sent);
                }
                debug!(generation, "Sent keep-alive ping");
            }

            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = sink.send(payload).await {
                        break SessionEnd::Lost(format!("send failed: {}", e));
                    }
                    if let Some(channel) = channel.upgrade() {
                        StatsCounters::bump(&channel.stats().messages_sent);
                    }
                }
                None => break SessionEnd::Planned,
            },

            frame = stream.next() => match frame {
                Some(Ok(WebSocketMessage::Text(text))) => {
                    let Some(channel) = channel.upgrade() else {
                        break SessionEnd::Planned;
                    };
                    channel.handle_inbound(ChannelMessage::parse(&text));
                }
                Some(Ok(WebSocketMessage::Binary(data))) => {
                    let Some(channel) = channel.upgrade() else {
                        break SessionEnd::Planned;
                    };
                    channel.handle_inbound(ChannelMessage::parse_bytes(&data));
                }
                Some(Ok(WebSocketMessage::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("closed by server ({}: {})", f.code, f.reason))
                        .unwrap_or_else(|| "closed by server".to_string());
                    break SessionEnd::Lost(reason);
                }
                Some(Ok(_)) => {
                    // Ping/pong frames are answered by the protocol layer
                }
                Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                None => break SessionEnd::Lost("stream ended".to_string()),
            },
        }
    };

    match end {
        SessionEnd::Planned => {
            close_transport(&mut sink).await;
            info!(generation, "Realtime connection closed");
        }
        SessionEnd::Lost(reason) => lost(&channel, generation, &reason),
    }
}

fn lost(channel: &WeakChannel, generation: u64, reason: &str) {
    if let Some(channel) = channel.upgrade() {
        channel.session_closed(generation, reason);
    }
}

async fn close_transport(sink: &mut FrameSink) {
    if let Err(e) = sink.send(WebSocketMessage::close()).await {
        debug!(error = %e, "Close frame not delivered");
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Error while closing realtime transport");
    }
}
