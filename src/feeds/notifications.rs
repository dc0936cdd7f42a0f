use crate::error::Result;
use crate::notify::NotificationSink;
use crate::payload::{Notification, Payload};
use crate::session::{Session, Subscription};
use crate::topics::Topic;

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Extra callback run after the sink for each notification
pub type NotificationCallback = Arc<dyn Fn(&Notification) + Send + Sync>;

/// A user's notification topic wired to a sink
pub struct NotificationFeed {
    user_id: String,
    subscription: Subscription,
}

impl NotificationFeed {
    /// Subscribe to `user_id`'s notifications
    ///
    /// Each delivery goes to `sink` first, then to `callback`.
    pub fn attach(
        session: &Session,
        user_id: impl fmt::Display,
        sink: Arc<dyn NotificationSink>,
        callback: Option<NotificationCallback>,
    ) -> Result<Self> {
        let user_id = user_id.to_string();
        let topic = Topic::notifications(&user_id)?;

        let subscription = session.subscribe_topic(topic, move |topic, payload| match payload {
            Payload::Notification(notification) => {
                debug!(topic = %topic, id = notification.id, kind = %notification.kind, "Notification received");
                sink.present(notification);
                if let Some(callback) = &callback {
                    callback(notification);
                }
            }
            other => debug!(topic = %topic, kind = ?other.kind(), "Expected a notification"),
        });

        info!(user_id = %user_id, "Notification feed attached");
        Ok(Self {
            user_id,
            subscription,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn topic(&self) -> &Topic {
        self.subscription.topic()
    }

    /// Stop receiving notifications; false if already detached
    pub fn detach(&self) -> bool {
        let removed = self.subscription.unsubscribe();
        if removed {
            info!(user_id = %self.user_id, "Notification feed detached");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::transport::MemoryConnector;

    struct Discard;

    impl NotificationSink for Discard {
        fn present(&self, _notification: &Notification) {}
    }

    #[test]
    fn test_attach_and_detach() {
        let (connector, _listener) = MemoryConnector::new();
        let session = Session::with_connector(SessionConfig::new("memory://broker"), connector);

        let feed = NotificationFeed::attach(&session, 42, Arc::new(Discard), None).unwrap();
        assert_eq!(feed.user_id(), "42");
        assert_eq!(feed.topic().as_str(), "/topic/notifications/42");
        assert_eq!(session.subscription_count(), 1);

        assert!(feed.detach());
        assert!(!feed.detach());
        assert_eq!(session.subscription_count(), 0);
    }
}
