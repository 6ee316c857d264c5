//! Process-wide realtime channel
//!
//! Dashboards, device views and the activity feed all share one connection.
//! The application installs it once at startup with [`init`] and every
//! consumer reaches it through [`global`].

use crate::auth::TokenProvider;
use crate::channel::RealtimeChannel;
use crate::config::ChannelConfig;
use crate::transport::Connector;
use crate::types::{ChannelError, ChannelResult};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

static GLOBAL_CHANNEL: Lazy<Mutex<Option<RealtimeChannel>>> = Lazy::new(|| Mutex::new(None));

/// Install the shared channel over the tokio-tungstenite connector.
///
/// The channel is created but not connected.
pub fn init(config: ChannelConfig, tokens: Arc<dyn TokenProvider>) -> ChannelResult<RealtimeChannel> {
    install(|| RealtimeChannel::new(config, tokens))
}

/// Install the shared channel over a custom connector
pub fn init_with_connector(
    config: ChannelConfig,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
) -> ChannelResult<RealtimeChannel> {
    install(|| RealtimeChannel::with_connector(config, tokens, connector))
}

fn install(
    build: impl FnOnce() -> ChannelResult<RealtimeChannel>,
) -> ChannelResult<RealtimeChannel> {
    let mut slot = GLOBAL_CHANNEL.lock();
    if slot.is_some() {
        return Err(ChannelError::AlreadyInitialized);
    }

    let channel = build()?;
    info!(api_base_url = %channel.config().api_base_url, "Realtime channel installed");
    *slot = Some(channel.clone());
    Ok(channel)
}

/// The shared channel
pub fn global() -> ChannelResult<RealtimeChannel> {
    try_global().ok_or(ChannelError::NotInitialized)
}

pub fn try_global() -> Option<RealtimeChannel> {
    GLOBAL_CHANNEL.lock().clone()
}

pub fn is_initialized() -> bool {
    GLOBAL_CHANNEL.lock().is_some()
}

/// Disconnect and remove the shared channel. Returns whether one was
/// installed.
pub fn shutdown() -> bool {
    let channel = GLOBAL_CHANNEL.lock().take();
    match channel {
        Some(channel) => {
            channel.disconnect();
            info!("Realtime channel shut down");
            true
        }
        None => false,
    }
}
