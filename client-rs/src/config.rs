//! Configuration for subscription sessions and the publish client

use crate::channel::Channel;
use std::time::Duration;

/// Path of the realtime endpoint on the realtime host
pub const REALTIME_PATH: &str = "/event/realtime";

/// Configuration for a subscription session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Topic to subscribe to
    pub channel: Channel,

    /// Wait for `connection_ack` before sending `subscribe`
    pub await_connection_ack: bool,

    /// Repeat the credential in the subscribe frame's `authorization` field
    pub subscribe_authorization: bool,

    /// Whether to automatically reconnect after a transport error
    pub auto_reconnect: bool,

    /// Initial delay before reconnecting
    pub reconnect_delay: Duration,

    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,

    /// Give up after this many consecutive failed attempts
    pub max_reconnect_attempts: u32,

    /// Timeout for establishing the connection
    pub connect_timeout: Duration,

    /// Capacity of the item buffer between the receive loop and the owner
    pub event_buffer: usize,

    /// Use `ws://` instead of `wss://` (local testing only)
    pub dangerous_plaintext: bool,
}

impl SessionConfig {
    /// Create a configuration for the given topic
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            await_connection_ack: false,
            subscribe_authorization: true,
            auto_reconnect: false,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(10),
            event_buffer: 256,
            dangerous_plaintext: false,
        }
    }

    /// Wait for the broker's `connection_ack` before subscribing
    pub fn await_connection_ack(mut self) -> Self {
        self.await_connection_ack = true;
        self
    }

    /// Toggle the `authorization` field of the subscribe frame
    pub fn subscribe_authorization(mut self, enabled: bool) -> Self {
        self.subscribe_authorization = enabled;
        self
    }

    /// Enable bounded reconnection with exponential backoff
    pub fn auto_reconnect(mut self, initial: Duration, max: Duration, attempts: u32) -> Self {
        self.auto_reconnect = true;
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the item buffer capacity
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Connect over plain `ws://` (DANGEROUS - only for local testing)
    pub fn dangerous_plaintext(mut self) -> Self {
        self.dangerous_plaintext = true;
        self
    }

    /// Realtime endpoint URL for a host
    pub fn endpoint_url(&self, realtime_host: &str) -> String {
        let scheme = if self.dangerous_plaintext { "ws" } else { "wss" };
        format!("{}://{}{}", scheme, realtime_host, REALTIME_PATH)
    }

    /// Backoff delay before reconnect attempt `attempt` (zero-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        std::cmp::min(
            self.reconnect_delay.saturating_mul(2u32.saturating_pow(attempt)),
            self.max_reconnect_delay,
        )
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Channel::default())
    }
}

/// Configuration for the local publish client (`POST /api/comments`)
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Base URL of the bridge server (e.g., "http://localhost:3000")
    pub base_url: String,

    /// Request timeout
    pub timeout: Duration,
}

impl PublishConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL of an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
