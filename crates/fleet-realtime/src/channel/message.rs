//! Inbound message envelope and well-known message types

use crate::types::ChannelResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Message types the fleet event server emits or expects
pub mod message_types {
    /// Activity and audit log entries
    pub const ACTIVITY: &str = "activity";
    /// Device telemetry samples
    pub const TELEMETRY: &str = "telemetry";
    /// Keep-alive sent by the channel
    pub const PING: &str = "ping";
    /// Keep-alive reply from the server
    pub const PONG: &str = "pong";
}

/// A decoded inbound message.
///
/// Any JSON value is accepted; routing uses the string `type` field when
/// present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMessage(Value);

impl ChannelMessage {
    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self)
    }

    /// Decode a binary frame holding UTF-8 JSON
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes).map(Self)
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// The `type` field, if it is a string
    pub fn message_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn is_type(&self, message_type: &str) -> bool {
        self.message_type() == Some(message_type)
    }

    /// The conventional `data` field carried by activity and telemetry events
    pub fn data(&self) -> Option<&Value> {
        self.0.get("data")
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }

    pub fn into_payload(self) -> Value {
        self.0
    }

    /// Deserialize the whole payload into a typed event
    pub fn decode<T: DeserializeOwned>(&self) -> ChannelResult<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }
}

/// The keep-alive payload
pub(crate) fn ping() -> Value {
    json!({ "type": message_types::PING })
}
