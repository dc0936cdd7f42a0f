//! Typed bindings for the dashboard's default topics
//!
//! - Prices: per-symbol ticks, batches, portfolio events, refresh requests
//! - Notifications: a user's topic wired to a notification sink

mod notifications;
mod prices;

pub use notifications::{NotificationCallback, NotificationFeed};
pub use prices::PriceFeed;
