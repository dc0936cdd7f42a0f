//! Configuration for a realtime session

use crate::payload::{PayloadDecoder, PayloadKind};
use std::time::Duration;

/// Configuration for connecting a [`Session`](crate::Session) to a broker
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Endpoint URL (e.g., "http://localhost:8080/ws-stock-prices")
    pub url: String,

    /// Whether to keep reconnecting after the connection drops
    pub auto_reconnect: bool,

    /// Fixed delay between reconnection attempts
    pub reconnect_delay: Duration,

    /// Interval at which we promise to send heartbeats (zero disables)
    pub heartbeat_outgoing: Duration,

    /// Interval at which we want to receive heartbeats (zero disables)
    pub heartbeat_incoming: Duration,

    /// Upper bound for transport connect plus STOMP handshake
    pub connect_timeout: Duration,

    /// How long `deactivate()` waits for the connection task to wind down
    pub close_timeout: Duration,

    /// Also try the SockJS raw WebSocket path when the endpoint refuses
    pub sockjs_fallback: bool,

    /// How inbound bodies are decoded per topic
    pub decoder: PayloadDecoder,
}

impl SessionConfig {
    /// Create a new configuration for the given endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            heartbeat_outgoing: Duration::from_secs(4),
            heartbeat_incoming: Duration::from_secs(4),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
            sockjs_fallback: true,
            decoder: PayloadDecoder::default(),
        }
    }

    /// Disable automatic reconnection
    pub fn no_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Set the fixed reconnection delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the heartbeat intervals (outgoing, incoming)
    pub fn heartbeat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heartbeat_outgoing = outgoing;
        self.heartbeat_incoming = incoming;
        self
    }

    /// Disable heartbeats in both directions
    pub fn no_heartbeat(self) -> Self {
        self.heartbeat(Duration::ZERO, Duration::ZERO)
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the close timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Enable or disable the SockJS fallback path
    pub fn sockjs_fallback(mut self, enabled: bool) -> Self {
        self.sockjs_fallback = enabled;
        self
    }

    /// Decode bodies on `pattern` (a topic or a category) as `kind`
    ///
    /// Rules added here take precedence over the built-in ones.
    pub fn decode_as(mut self, pattern: impl Into<String>, kind: PayloadKind) -> Self {
        self.decoder = self.decoder.with_rule(pattern, kind);
        self
    }
}
