//! Application Configuration
//!
//! Everything comes from the environment with sane defaults. Invalid
//! values warn and fall back rather than abort: a typo in a tuning knob
//! should not keep the bots offline.

use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rest_base_url: String,
    pub public_ws_url: String,
    pub private_ws_url: String,
    /// Private channel carrying this account's order events.
    pub private_channel: String,
    /// Optional key prefix for multi-tenant deployments; empty for none.
    pub key_prefix: String,
    pub heartbeat_interval: Duration,
    pub handshake_timeout: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Attempt budget per disconnect for the private feed. The public feed
    /// retries indefinitely.
    pub private_max_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            rest_base_url: "https://indodax.com".to_string(),
            public_ws_url: "wss://ws3.indodax.com/ws/".to_string(),
            private_ws_url: "wss://pws.indodax.com/ws/".to_string(),
            private_channel: "orders".to_string(),
            key_prefix: String::new(),
            heartbeat_interval: Duration::from_secs(25),
            handshake_timeout: Duration::from_secs(10),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
            private_max_attempts: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();

        if let Ok(url) = std::env::var("ARUS_REST_URL") {
            config.rest_base_url = url;
        }
        if let Ok(url) = std::env::var("ARUS_PUBLIC_WS_URL") {
            config.public_ws_url = url;
        }
        if let Ok(url) = std::env::var("ARUS_PRIVATE_WS_URL") {
            config.private_ws_url = url;
        }
        if let Ok(channel) = std::env::var("ARUS_PRIVATE_CHANNEL") {
            config.private_channel = channel;
        }
        if let Ok(prefix) = std::env::var("ARUS_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(secs) = env_u64("ARUS_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("ARUS_HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(millis) = env_u64("ARUS_RECONNECT_INITIAL_MS") {
            config.reconnect_initial_delay = Duration::from_millis(millis);
        }
        if let Some(secs) = env_u64("ARUS_RECONNECT_MAX_SECS") {
            config.reconnect_max_delay = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_u64("ARUS_PRIVATE_MAX_ATTEMPTS") {
            config.private_max_attempts = attempts as u32;
        }

        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        Ok(value) => {
            warn!("{} must be positive, got {}; using default", name, value);
            None
        }
        Err(e) => {
            warn!("failed to parse {} '{}': {}; using default", name, raw, e);
            None
        }
    }
}
