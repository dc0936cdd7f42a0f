//! Error types for the realtime client

use crate::topics::TopicError;
use thiserror::Error;

/// Errors that can occur when using a realtime session
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Connection to the server failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not currently connected to the server
    #[error("Not connected")]
    NotConnected,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Transport-level failure (socket error, stream closed)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The broker answered with an ERROR frame or an unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An inbound frame or its body could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Failed to serialize/deserialize a payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid topic name
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    /// A subscriber callback panicked while handling a delivery
    #[error("Callback failed: {0}")]
    Callback(String),

    /// No inbound traffic within the negotiated heartbeat window
    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    /// The session has been deactivated
    #[error("Session shut down")]
    Shutdown,
}

impl RealtimeError {
    /// Copy of this error for handing to more than one waiter
    ///
    /// `serde_json::Error` cannot be cloned, so it is carried as its message.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            RealtimeError::Connection(m) => RealtimeError::Connection(m.clone()),
            RealtimeError::NotConnected => RealtimeError::NotConnected,
            RealtimeError::Timeout => RealtimeError::Timeout,
            RealtimeError::Transport(m) => RealtimeError::Transport(m.clone()),
            RealtimeError::Protocol(m) => RealtimeError::Protocol(m.clone()),
            RealtimeError::MalformedFrame(m) => RealtimeError::MalformedFrame(m.clone()),
            RealtimeError::Serialization(e) => RealtimeError::MalformedFrame(e.to_string()),
            RealtimeError::InvalidTopic(e) => RealtimeError::InvalidTopic(e.clone()),
            RealtimeError::Callback(m) => RealtimeError::Callback(m.clone()),
            RealtimeError::HeartbeatTimeout => RealtimeError::HeartbeatTimeout,
            RealtimeError::Shutdown => RealtimeError::Shutdown,
        }
    }
}

/// Result type for realtime operations
pub type Result<T> = std::result::Result<T, RealtimeError>;
