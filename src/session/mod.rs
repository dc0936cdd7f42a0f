//! Reconnecting session over a STOMP broker
//!
//! A [`Session`] owns one logical connection to one endpoint. Subscriptions
//! are recorded in a registry that survives disconnects; each time the
//! connection (re)opens, every registered topic is subscribed again on the
//! wire. Inbound MESSAGE frames are decoded once and handed to every
//! callback registered for their destination, in registration order.

mod dispatch;
mod lifecycle;
mod registry;

pub use dispatch::{DispatchReport, Dispatcher, HandlerSource};
pub use registry::{MessageHandler, Registry, Removed, SubscriptionId, WireProjection};

use crate::config::SessionConfig;
use crate::error::{RealtimeError, Result};
use crate::payload::Payload;
use crate::protocol::Frame;
use crate::topics::Topic;
use crate::transport::{Connector, WebSocketConnector};

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Handle to a realtime session; clones share the same connection
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    state: watch::Sender<ConnectionState>,
    core: Mutex<Core>,
    /// Why a non-retrying activation ended
    last_error: Mutex<Option<RealtimeError>>,
}

/// Everything guarded by the session lock
#[derive(Default)]
struct Core {
    registry: Registry,
    wire: WireProjection,
    /// Outbound frames for the live connection; `None` unless connected
    link: Option<mpsc::UnboundedSender<Frame>>,
    /// Bumped by every activate/deactivate; stale tasks compare against it
    generation: u64,
    /// Successful handshakes so far
    connects: u64,
    task: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl Core {
    fn open_on_wire(&mut self, topic: &Topic) {
        let Some(link) = &self.link else {
            return;
        };
        if let Some(frame) = self.wire.open(topic) {
            if link.send(frame).is_err() {
                debug!(topic = %topic, "Connection task gone, subscribe deferred");
            }
        }
    }

    fn close_on_wire(&mut self, topic: &Topic) {
        let Some(link) = &self.link else {
            return;
        };
        if let Some(frame) = self.wire.close(topic.as_str()) {
            if link.send(frame).is_err() {
                debug!(topic = %topic, "Connection task gone, unsubscribe dropped");
            }
        }
    }
}

impl SessionInner {
    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Callers hold the core lock
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn subscribe(&self, topic: Topic, handler: MessageHandler) -> SubscriptionId {
        let mut core = self.core.lock();
        let id = core.registry.insert(topic.clone(), handler);
        core.open_on_wire(&topic);
        debug!(topic = %topic, subscription = %id, "Subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut core = self.core.lock();
        let Some(removed) = core.registry.remove(id) else {
            return false;
        };
        if removed.last_for_topic {
            core.close_on_wire(&removed.topic);
        }
        debug!(topic = %removed.topic, subscription = %id, "Unsubscribed");
        true
    }
}

impl Session {
    /// Create a session that connects over WebSocket
    pub fn new(config: SessionConfig) -> Self {
        let connector = WebSocketConnector::new(config.sockjs_fallback);
        Self::with_connector(config, connector)
    }

    /// Create a session over a custom transport
    pub fn with_connector<C>(config: SessionConfig, connector: C) -> Self
    where
        C: Connector + 'static,
    {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let dispatcher = Dispatcher::new(config.decoder.clone());

        Self {
            inner: Arc::new(SessionInner {
                config,
                connector: Arc::new(connector),
                dispatcher,
                state,
                core: Mutex::new(Core::default()),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    /// Observe connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Start connecting and wait for the first successful connection
    ///
    /// Does nothing if already connected. While connecting, waits for the
    /// attempt in progress. Connection failures are retried every
    /// `reconnect_delay` unless reconnection is disabled, in which case the
    /// first failure is returned. Fails with [`RealtimeError::Shutdown`] if
    /// `deactivate()` runs before a connection is made.
    pub async fn activate(&self) -> Result<()> {
        let mut changes = self.inner.state.subscribe();

        let (generation, baseline) = {
            let mut core = self.inner.core.lock();
            match self.inner.current_state() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnecting => {
                    return Err(RealtimeError::Connection(
                        "cannot activate while Disconnecting".into(),
                    ))
                }
                ConnectionState::Connecting => (core.generation, core.connects),
                ConnectionState::Disconnected => {
                    info!(url = %self.inner.config.url, "Activating session");
                    core.generation += 1;
                    let generation = core.generation;
                    let (shutdown_tx, shutdown_rx) = watch::channel(false);
                    core.shutdown = Some(shutdown_tx);
                    self.inner.last_error.lock().take();
                    self.inner.set_state(ConnectionState::Connecting);
                    core.task = Some(tokio::spawn(lifecycle::run(
                        self.inner.clone(),
                        generation,
                        shutdown_rx,
                    )));
                    (generation, core.connects)
                }
            }
        };

        loop {
            {
                let core = self.inner.core.lock();
                if core.generation != generation {
                    return Err(RealtimeError::Shutdown);
                }
                if core.connects > baseline {
                    return Ok(());
                }
                if self.inner.current_state() == ConnectionState::Disconnected {
                    // Kept until the next activation so every waiter sees it
                    let error = self
                        .inner
                        .last_error
                        .lock()
                        .as_ref()
                        .map(RealtimeError::replicate);
                    return Err(error
                        .unwrap_or_else(|| RealtimeError::Connection("connection failed".into())));
                }
            }

            if changes.changed().await.is_err() {
                return Err(RealtimeError::Shutdown);
            }
        }
    }

    /// Tear down the connection and stop reconnecting
    ///
    /// Safe in any state. Subscriptions stay registered and are restored by
    /// the next `activate()`. Once this returns, no callback is invoked and
    /// no state change happens until the session is activated again.
    pub async fn deactivate(&self) {
        let (task, shutdown) = {
            let mut core = self.inner.core.lock();
            if core.task.is_none() && self.inner.current_state() == ConnectionState::Disconnected {
                return;
            }
            core.generation += 1;
            core.link = None;
            core.wire.reset();
            self.inner.set_state(ConnectionState::Disconnecting);
            (core.task.take(), core.shutdown.take())
        };

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }

        if let Some(mut task) = task {
            let close_timeout = self.inner.config.close_timeout;
            if tokio::time::timeout(close_timeout, &mut task).await.is_err() {
                warn!(timeout = ?close_timeout, "Connection task did not stop in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }

        let core = self.inner.core.lock();
        if core.task.is_none() && self.inner.current_state() == ConnectionState::Disconnecting {
            self.inner.set_state(ConnectionState::Disconnected);
        }
        info!(url = %self.inner.config.url, "Session deactivated");
    }

    /// Send a frame on the live connection
    ///
    /// Fails with [`RealtimeError::NotConnected`] unless connected; nothing
    /// is queued for later.
    pub fn send(&self, frame: Frame) -> Result<()> {
        let core = self.inner.core.lock();
        let link = core.link.as_ref().ok_or(RealtimeError::NotConnected)?;
        link.send(frame).map_err(|_| RealtimeError::NotConnected)
    }

    /// Serialize `body` as JSON and SEND it to `destination`
    pub fn publish<T>(&self, destination: &str, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let destination = Topic::parse(destination)?;
        let body = serde_json::to_vec(body)?;
        self.send(Frame::send(destination.as_str(), body))
    }

    /// Register `callback` for deliveries on `topic`
    ///
    /// Works in every state; the wire subscription follows once connected.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(&Topic, &Payload) + Send + Sync + 'static,
    {
        let topic = Topic::parse(topic)?;
        Ok(self.subscribe_topic(topic, callback))
    }

    pub fn subscribe_topic<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&Topic, &Payload) + Send + Sync + 'static,
    {
        let id = self.inner.subscribe(topic.clone(), Arc::new(callback));
        Subscription {
            id,
            topic,
            session: Arc::downgrade(&self.inner),
        }
    }

    /// Remove one subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Remove every subscription
    pub fn unsubscribe_all(&self) {
        let mut core = self.inner.core.lock();
        let topics = core.registry.clear();
        for topic in &topics {
            core.close_on_wire(topic);
        }
        debug!(topics = topics.len(), "Unsubscribed from all topics");
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.core.lock().registry.len()
    }

    /// Topics with at least one subscription
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.inner.core.lock().registry.topics().cloned().collect();
        topics.sort();
        topics
    }

    /// Topics currently subscribed on the live connection
    pub fn wire_topics(&self) -> Vec<Topic> {
        let mut topics = self.inner.core.lock().wire.topics();
        topics.sort();
        topics
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.inner.config.url)
            .field("state", &self.connection_state())
            .finish()
    }
}

/// One registered callback
///
/// Dropping the handle does not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    session: Weak<SessionInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove this subscription; false if already gone
    pub fn unsubscribe(&self) -> bool {
        match self.session.upgrade() {
            Some(inner) => inner.unsubscribe(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;

    fn offline_session() -> Session {
        let (connector, _listener) = MemoryConnector::new();
        Session::with_connector(SessionConfig::new("memory://broker"), connector)
    }

    #[test]
    fn test_subscribe_while_disconnected_is_deferred() {
        let session = offline_session();
        let sub = session.subscribe("price/TCS", |_, _| {}).unwrap();

        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.subscription_count(), 1);
        assert_eq!(session.topics(), vec![Topic::parse("price/TCS").unwrap()]);
        assert!(session.wire_topics().is_empty());
        assert_eq!(sub.topic().as_str(), "price/TCS");
    }

    #[test]
    fn test_subscribe_rejects_invalid_topic() {
        let session = offline_session();
        assert!(matches!(
            session.subscribe("", |_, _| {}),
            Err(RealtimeError::InvalidTopic(_))
        ));
        assert_eq!(session.subscription_count(), 0);
    }

    #[test]
    fn test_send_requires_connection() {
        let session = offline_session();
        assert!(matches!(
            session.send(Frame::send("/app/stock-price/TCS", "{}")),
            Err(RealtimeError::NotConnected)
        ));
        assert!(matches!(
            session.publish("/app/stock-price/TCS", &serde_json::json!({"symbol": "TCS"})),
            Err(RealtimeError::NotConnected)
        ));
    }

    #[test]
    fn test_subscription_handle_unsubscribes_once() {
        let session = offline_session();
        let a = session.subscribe("notify/42", |_, _| {}).unwrap();
        let b = session.subscribe("notify/42", |_, _| {}).unwrap();

        assert!(a.unsubscribe());
        assert!(!a.unsubscribe());
        assert!(!session.unsubscribe(a.id()));
        assert_eq!(session.subscription_count(), 1);

        drop(session);
        assert!(!b.unsubscribe());
    }

    #[test]
    fn test_unsubscribe_all() {
        let session = offline_session();
        session.subscribe("price/TCS", |_, _| {}).unwrap();
        session.subscribe("price/INFY", |_, _| {}).unwrap();

        session.unsubscribe_all();
        assert_eq!(session.subscription_count(), 0);
        assert!(session.topics().is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_before_activate_is_noop() {
        let session = offline_session();
        session.deactivate().await;
        session.deactivate().await;
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Disconnecting.to_string(), "disconnecting");
    }
}
