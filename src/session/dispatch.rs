//! Routes inbound MESSAGE frames to subscriber callbacks

use crate::error::{RealtimeError, Result};
use crate::payload::PayloadDecoder;
use crate::protocol::Frame;
use crate::session::registry::{MessageHandler, SubscriptionId};
use crate::topics::Topic;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// Read access to the current subscribers of a topic
///
/// Handlers are looked up one at a time so that a callback which changes
/// the registry affects the rest of the same dispatch.
pub trait HandlerSource {
    fn subscriber_ids(&self, topic: &Topic) -> Vec<SubscriptionId>;

    fn handler(&self, id: SubscriptionId) -> Option<MessageHandler>;
}

/// Outcome of dispatching one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub topic: Topic,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    decoder: PayloadDecoder,
}

impl Dispatcher {
    pub fn new(decoder: PayloadDecoder) -> Self {
        Self { decoder }
    }

    /// Deliver a MESSAGE frame to every subscriber of its destination
    ///
    /// A frame for a topic without subscribers is dropped and reported as
    /// zero deliveries. The body is decoded once, before any callback runs.
    pub fn dispatch<S>(&self, source: &S, frame: &Frame) -> Result<DispatchReport>
    where
        S: HandlerSource + ?Sized,
    {
        let destination = frame
            .destination()
            .ok_or_else(|| RealtimeError::MalformedFrame("MESSAGE without destination".into()))?;
        let topic = Topic::parse(destination).map_err(|e| {
            RealtimeError::MalformedFrame(format!("bad destination {:?}: {}", destination, e))
        })?;

        let ids = source.subscriber_ids(&topic);
        if ids.is_empty() {
            debug!(topic = %topic, "No subscribers, dropping frame");
            return Ok(DispatchReport {
                topic,
                delivered: 0,
                failed: 0,
            });
        }

        let payload = self.decoder.decode(&topic, &frame.body)?;

        let mut report = DispatchReport {
            topic,
            delivered: 0,
            failed: 0,
        };

        for id in ids {
            // Unsubscribed by an earlier callback of this dispatch
            let Some(handler) = source.handler(id) else {
                continue;
            };

            match catch_unwind(AssertUnwindSafe(|| handler(&report.topic, &payload))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    let err = RealtimeError::Callback(panic_message(panic.as_ref()));
                    warn!(topic = %report.topic, subscription = %id, error = %err, "Subscriber callback failed");
                }
            }
        }

        Ok(report)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}
