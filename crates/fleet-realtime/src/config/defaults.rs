//! Default configuration values

pub struct ChannelDefaults;

impl ChannelDefaults {
    pub const API_BASE_URL: &'static str = "http://localhost:8000";
    pub const WS_PATH: &'static str = "/ws";
    pub const KEEP_ALIVE_INTERVAL_MS: u64 = 30_000;
    pub const RECONNECT_DELAY_MS: u64 = 3_000;
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
    pub const BACKOFF_JITTER: f64 = 0.2;
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024; // 64MB
}
