//! Subscription registry and its wire projection
//!
//! The registry is the authoritative record of what should be subscribed. The
//! wire projection tracks which topics currently have a SUBSCRIBE outstanding
//! on the live connection; it is discarded on every connection loss and
//! rebuilt from the registry on the next CONNECTED.

use crate::payload::Payload;
use crate::protocol::Frame;
use crate::topics::Topic;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Callback invoked for each delivery on a subscribed topic
pub type MessageHandler = Arc<dyn Fn(&Topic, &Payload) + Send + Sync>;

/// Identifies one `subscribe` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Entry {
    id: SubscriptionId,
    handler: MessageHandler,
}

/// Result of removing a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub topic: Topic,
    /// No subscriptions remain for the topic
    pub last_for_topic: bool,
}

/// topic -> subscriptions, each topic's list in registration order
#[derive(Default)]
pub struct Registry {
    topics: HashMap<Topic, Vec<Entry>>,
    index: HashMap<SubscriptionId, Topic>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription
    pub fn insert(&mut self, topic: Topic, handler: MessageHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.index.insert(id, topic.clone());
        self.topics
            .entry(topic)
            .or_default()
            .push(Entry { id, handler });
        id
    }

    /// Remove exactly the subscription `id`
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Removed> {
        let topic = self.index.remove(&id)?;

        let last_for_topic = match self.topics.get_mut(&topic) {
            Some(entries) => {
                entries.retain(|entry| entry.id != id);
                entries.is_empty()
            }
            None => true,
        };
        if last_for_topic {
            self.topics.remove(&topic);
        }

        Some(Removed {
            topic,
            last_for_topic,
        })
    }

    /// Remove everything, returning the topics that had subscriptions
    pub fn clear(&mut self) -> Vec<Topic> {
        self.index.clear();
        self.topics.drain().map(|(topic, _)| topic).collect()
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.keys()
    }

    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn topic_of(&self, id: SubscriptionId) -> Option<&Topic> {
        self.index.get(&id)
    }

    /// Subscriptions on `topic`, in registration order
    pub fn subscriber_ids(&self, topic: &str) -> Vec<SubscriptionId> {
        self.topics
            .get(topic)
            .map(|entries| entries.iter().map(|entry| entry.id).collect())
            .unwrap_or_default()
    }

    pub fn handler(&self, id: SubscriptionId) -> Option<MessageHandler> {
        let topic = self.index.get(&id)?;
        self.topics
            .get(topic)?
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.handler.clone())
    }

    /// Number of subscriptions across all topics
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Topics with a SUBSCRIBE outstanding on the current connection
#[derive(Debug, Default)]
pub struct WireProjection {
    next_id: u64,
    active: HashMap<Topic, String>,
}

impl WireProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// SUBSCRIBE frame for `topic`, unless it is already on the wire
    pub fn open(&mut self, topic: &Topic) -> Option<Frame> {
        if self.active.contains_key(topic.as_str()) {
            return None;
        }
        let wire_id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        let frame = Frame::subscribe(&wire_id, topic.as_str());
        self.active.insert(topic.clone(), wire_id);
        Some(frame)
    }

    /// UNSUBSCRIBE frame for `topic`, if it is on the wire
    pub fn close(&mut self, topic: &str) -> Option<Frame> {
        self.active
            .remove(topic)
            .map(|wire_id| Frame::unsubscribe(&wire_id))
    }

    /// Forget the projection after the connection is gone
    pub fn reset(&mut self) {
        self.active.clear();
    }

    pub fn wire_id(&self, topic: &str) -> Option<&str> {
        self.active.get(topic).map(String::as_str)
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.active.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn topic(name: &str) -> Topic {
        Topic::parse(name).unwrap()
    }

    fn noop() -> MessageHandler {
        Arc::new(|_, _| {})
    }

    #[test]
    fn test_insert_keeps_registration_order() {
        let mut registry = Registry::new();
        let a = registry.insert(topic("notify/42"), noop());
        let b = registry.insert(topic("notify/42"), noop());
        let c = registry.insert(topic("notify/42"), noop());

        assert_eq!(registry.subscriber_ids("notify/42"), vec![a, b, c]);
        assert_eq!(registry.len(), 3);
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_targets_only_one_subscription() {
        let mut registry = Registry::new();
        let a = registry.insert(topic("notify/42"), noop());
        let b = registry.insert(topic("notify/42"), noop());

        let removed = registry.remove(a).unwrap();
        assert_eq!(removed.topic, topic("notify/42"));
        assert!(!removed.last_for_topic);
        assert_eq!(registry.subscriber_ids("notify/42"), vec![b]);

        let removed = registry.remove(b).unwrap();
        assert!(removed.last_for_topic);
        assert!(!registry.contains_topic("notify/42"));
        assert!(registry.is_empty());

        // removing twice is harmless
        assert!(registry.remove(b).is_none());
    }

    #[test]
    fn test_handler_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut registry = Registry::new();
        let id = registry.insert(
            topic("price/TCS"),
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let handler = registry.handler(id).unwrap();
        handler(&topic("price/TCS"), &Payload::Json(serde_json::Value::Null));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.topic_of(id), Some(&topic("price/TCS")));

        registry.remove(id);
        assert!(registry.handler(id).is_none());
        assert!(registry.topic_of(id).is_none());
    }

    #[test]
    fn test_clear_returns_topics() {
        let mut registry = Registry::new();
        registry.insert(topic("price/TCS"), noop());
        registry.insert(topic("price/TCS"), noop());
        registry.insert(topic("price/INFY"), noop());

        let mut topics = registry.clear();
        topics.sort();
        assert_eq!(topics, vec![topic("price/INFY"), topic("price/TCS")]);
        assert!(registry.is_empty());
        assert_eq!(registry.topics().count(), 0);
    }

    #[test]
    fn test_wire_open_is_idempotent_per_topic() {
        let mut wire = WireProjection::new();

        let frame = wire.open(&topic("price/TCS")).unwrap();
        assert_eq!(frame.command, Command::Subscribe);
        assert_eq!(frame.get("id"), Some("sub-0"));
        assert_eq!(frame.destination(), Some("price/TCS"));

        assert!(wire.open(&topic("price/TCS")).is_none());
        assert_eq!(wire.len(), 1);
    }

    #[test]
    fn test_wire_close_uses_wire_id() {
        let mut wire = WireProjection::new();
        wire.open(&topic("price/TCS"));
        wire.open(&topic("price/INFY"));

        let frame = wire.close("price/INFY").unwrap();
        assert_eq!(frame.command, Command::Unsubscribe);
        assert_eq!(frame.get("id"), Some("sub-1"));
        assert!(wire.close("price/INFY").is_none());
        assert_eq!(wire.topics(), vec![topic("price/TCS")]);
    }

    #[test]
    fn test_wire_ids_are_not_reused_after_reset() {
        let mut wire = WireProjection::new();
        wire.open(&topic("price/TCS"));
        wire.reset();
        assert!(wire.is_empty());

        let frame = wire.open(&topic("price/TCS")).unwrap();
        assert_eq!(frame.get("id"), Some("sub-1"));
        assert_eq!(wire.wire_id("price/TCS"), Some("sub-1"));
    }
}
