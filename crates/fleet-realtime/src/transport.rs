//! Transport seam between the channel and the socket implementation

use crate::types::{ChannelError, ChannelResult, WebSocketMessage};
use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{connect_async_with_config, tungstenite};
use tracing::debug;
use url::Url;

/// Outbound half of an open connection
pub type FrameSink = Pin<Box<dyn Sink<WebSocketMessage, Error = ChannelError> + Send>>;

/// Inbound half of an open connection. The stream ending means the peer
/// went away.
pub type FrameStream = Pin<Box<dyn Stream<Item = ChannelResult<WebSocketMessage>> + Send>>;

/// An open, handshaken connection
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<WebSocketMessage, Error = ChannelError> + Send + 'static,
        R: Stream<Item = ChannelResult<WebSocketMessage>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens connections for the channel
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake with `url`. Resolves once the connection is
    /// open or has failed.
    async fn connect(&self, url: &Url) -> ChannelResult<Transport>;
}

/// Production connector over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    max_message_size: Option<usize>,
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self {
            max_message_size: None,
        }
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    fn protocol_config(&self) -> tungstenite::protocol::WebSocketConfig {
        let mut config = tungstenite::protocol::WebSocketConfig::default();
        if let Some(size) = self.max_message_size {
            config.max_message_size = Some(size);
            config.max_frame_size = Some(size);
        }
        config
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> ChannelResult<Transport> {
        let (ws_stream, response) =
            connect_async_with_config(url.as_str(), Some(self.protocol_config()), false).await?;
        debug!(status = %response.status(), "WebSocket handshake completed");

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(ChannelError::from)
            .with(|msg: WebSocketMessage| {
                future::ready(Ok::<_, ChannelError>(tungstenite::Message::from(msg)))
            });

        let stream = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(msg) => WebSocketMessage::from_tungstenite(msg).map(Ok),
                Err(e) => Some(Err(ChannelError::from(e))),
            })
        });

        Ok(Transport::new(sink, stream))
    }
}

/// URL safe for logs: the token query is stripped
pub(crate) fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}
