//! # fleet-realtime
//!
//! Realtime event channel for the fleetdesk console.
//!
//! A single WebSocket connection to the fleet event server, authenticated
//! with the session's bearer token. The crate provides:
//! - Automatic reconnection after unplanned drops
//! - Fixed-interval keep-alive pings
//! - Publish/subscribe dispatch by message `type`, with `"*"` for everything
//! - Environment-driven configuration and structured logging setup

// Core modules
pub mod auth;
pub mod channel;
pub mod config;
pub mod logging;
pub mod service;
pub mod testing;
pub mod transport;
pub mod types;

// Main channel API
pub use channel::{
    message_types, ChannelMessage, ChannelStats, RealtimeChannel, SubscriberRegistry, Subscription,
    Topic, WILDCARD,
};

// Configuration and authentication
pub use auth::{SessionTokens, StaticToken, TokenProvider};
pub use config::{ChannelConfig, ChannelDefaults, ReconnectPolicy};

// Transport seam
pub use transport::{Connector, Transport, TungsteniteConnector};

// Frames, state and errors
pub use types::{ChannelError, ChannelResult, ChannelState, WebSocketMessage};

pub use logging::{init_logging, LogFormat, LoggingConfig};
