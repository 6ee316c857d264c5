//! Realtime event channel
//!
//! - [`realtime`] - connection lifecycle and the public [`RealtimeChannel`] handle
//! - [`session`] - the task driving one connection
//! - [`registry`] - subscriber fan-out by message type
//! - [`message`] - inbound message envelope
//! - [`stats`] - channel counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleet_realtime::{ChannelConfig, ChannelMessage, RealtimeChannel, SessionTokens};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tokens = Arc::new(SessionTokens::new());
//!     tokens.set_token("session-token");
//!
//!     let channel = RealtimeChannel::new(ChannelConfig::new("https://fleet.example.com"), tokens)?;
//!     let activity = channel.subscribe("activity", |message: &ChannelMessage| {
//!         println!("activity: {:?}", message.data());
//!     });
//!
//!     channel.connect();
//!     channel.send(&serde_json::json!({ "type": "subscribe_device", "device_id": "dev-42" }));
//!
//!     activity.unsubscribe();
//!     channel.disconnect();
//!     Ok(())
//! }
//! ```

pub mod message;
pub mod realtime;
pub mod registry;
mod session;
pub mod stats;

pub use message::{message_types, ChannelMessage};
pub use realtime::RealtimeChannel;
pub use registry::{Callback, SubscriberId, SubscriberRegistry, Subscription, Topic, WILDCARD};
pub use stats::ChannelStats;
