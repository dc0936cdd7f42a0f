//! Fintrack realtime - reconnecting pub/sub client for a STOMP broker
//!
//! Keeps a live connection to the dashboard's message broker over WebSocket,
//! remembers what the application subscribed to across reconnects, and
//! delivers typed price and notification updates to callbacks.
//!
//! # Example
//!
//! ```no_run
//! use fintrack_realtime::{Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new(SessionConfig::new("http://localhost:8080/ws-stock-prices"));
//!
//!     // Subscriptions may be made before connecting
//!     let sub = session.subscribe("/topic/stock-price/RELIANCE", |topic, payload| {
//!         if let Some(update) = payload.as_price() {
//!             println!("{}: {:?}", topic, update.current_price);
//!         }
//!     })?;
//!
//!     session.activate().await?;
//!
//!     session.publish("/app/stock-price/RELIANCE", &serde_json::json!({"symbol": "RELIANCE"}))?;
//!
//!     sub.unsubscribe();
//!     session.deactivate().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod feeds;
pub mod notify;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod topics;
pub mod transport;

pub use config::SessionConfig;
pub use error::{RealtimeError, Result};
pub use feeds::{NotificationFeed, PriceFeed};
pub use notify::{NotificationSink, NotificationSurface, PermissionState, SurfaceSink};
pub use payload::{Notification, NotificationType, Payload, PayloadKind, PriceUpdate};
pub use session::{ConnectionState, Session, Subscription, SubscriptionId};
pub use topics::Topic;
