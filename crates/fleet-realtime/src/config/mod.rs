//! Channel configuration
//!
//! Provides configuration structures for the realtime channel, integrating
//! with the fleet-core configuration system.

pub mod channel_config;
pub mod defaults;
pub mod reconnect;

pub use channel_config::ChannelConfig;
pub use defaults::ChannelDefaults;
pub use reconnect::ReconnectPolicy;
