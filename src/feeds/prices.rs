use crate::error::Result;
use crate::payload::{Payload, PriceUpdate};
use crate::session::{Session, Subscription, SubscriptionId};
use crate::topics::{self, Topic};

use parking_lot::Mutex;
use serde::Serialize;
use std::slice;
use tracing::debug;

/// Body of an on-demand price refresh request
#[derive(Debug, Serialize)]
struct PriceRequest<'a> {
    symbol: &'a str,
}

/// Live price subscriptions on a shared session
///
/// Tracks the subscriptions it created, so `unsubscribe_all` leaves other
/// users of the session alone.
pub struct PriceFeed {
    session: Session,
    owned: Mutex<Vec<Subscription>>,
}

impl PriceFeed {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            owned: Mutex::new(Vec::new()),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Price ticks for one symbol
    pub fn subscribe_symbol<F>(&self, symbol: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&PriceUpdate) + Send + Sync + 'static,
    {
        let topic = Topic::stock_price(symbol)?;
        let subscription = self
            .session
            .subscribe_topic(topic, move |topic, payload| match payload {
                Payload::Price(update) => callback(update),
                other => debug!(topic = %topic, kind = ?other.kind(), "Expected a price update"),
            });
        Ok(self.track(subscription))
    }

    /// Batches of price ticks across all symbols
    pub fn subscribe_all<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&[PriceUpdate]) + Send + Sync + 'static,
    {
        let subscription = self
            .session
            .subscribe(topics::STOCK_PRICES, move |topic, payload| match payload {
                Payload::PriceBatch(updates) => callback(updates),
                Payload::Price(update) => callback(slice::from_ref(update)),
                other => debug!(topic = %topic, kind = ?other.kind(), "Expected a price batch"),
            })?;
        Ok(self.track(subscription))
    }

    /// Portfolio change events, passed through as JSON
    pub fn subscribe_portfolio<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let subscription = self
            .session
            .subscribe(topics::PORTFOLIO_UPDATES, move |topic, payload| match payload {
                Payload::Json(value) => callback(value),
                other => debug!(topic = %topic, kind = ?other.kind(), "Expected a JSON portfolio event"),
            })?;
        Ok(self.track(subscription))
    }

    /// Ask the server to push a fresh price for `symbol`
    ///
    /// Fails with `NotConnected` unless the session is connected.
    pub fn request_price(&self, symbol: &str) -> Result<()> {
        let destination = Topic::join(topics::PRICE_REQUEST, symbol)?;
        self.session
            .publish(destination.as_str(), &PriceRequest { symbol })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut owned = self.owned.lock();
        let Some(pos) = owned.iter().position(|sub| sub.id() == id) else {
            return false;
        };
        owned.remove(pos).unsubscribe()
    }

    /// Drop this feed's subscriptions for `symbol`; returns how many
    pub fn unsubscribe_symbol(&self, symbol: &str) -> usize {
        let Ok(topic) = Topic::stock_price(symbol) else {
            return 0;
        };
        let mut owned = self.owned.lock();
        let mut removed = 0;
        owned.retain(|sub| {
            if sub.topic() == &topic {
                if sub.unsubscribe() {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        removed
    }

    /// Drop every subscription made through this feed
    pub fn unsubscribe_all(&self) {
        let owned: Vec<Subscription> = self.owned.lock().drain(..).collect();
        for subscription in owned {
            subscription.unsubscribe();
        }
    }

    /// Subscriptions made through this feed that are still registered
    pub fn subscription_count(&self) -> usize {
        self.owned.lock().len()
    }

    fn track(&self, subscription: Subscription) -> SubscriptionId {
        let id = subscription.id();
        self.owned.lock().push(subscription);
        id
    }
}
