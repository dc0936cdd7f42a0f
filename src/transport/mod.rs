//! Transport adapters
//!
//! A transport carries text messages to and from one server endpoint and
//! knows nothing about frames or subscriptions. End of the inbound stream is
//! the "closed" event, an `Err` item the "error" event.

mod memory;
mod websocket;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use websocket::{candidate_urls, WebSocketConnector};

use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;

/// Outbound half of a connection
pub type OutboundSink = Pin<Box<dyn Sink<String, Error = RealtimeError> + Send>>;

/// Inbound half of a connection
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One open duplex connection; dropping it closes the connection
pub struct TransportLink {
    pub outbound: OutboundSink,
    pub inbound: InboundStream,
}

/// Opens connections to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection to `url`
    async fn connect(&self, url: &str) -> Result<TransportLink>;
}
