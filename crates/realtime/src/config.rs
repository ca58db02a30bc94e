// crates/realtime/src/config.rs
//! Channel client configuration.

use std::time::Duration;

/// Configuration for the event channel client.
pub struct ChannelConfig {
    /// QUESTLINE_WS_URL env var (e.g. wss://host/ws). None = realtime disabled.
    pub url: Option<String>,
    pub heartbeat_interval: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("QUESTLINE_WS_URL").ok(),
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

impl ChannelConfig {
    /// Config pointing at a fixed endpoint, used by tests.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}
