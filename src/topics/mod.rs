//! Topic naming
//!
//! Topics are opaque destination strings of the form `<category>/<entity-id>`,
//! e.g. `/topic/stock-price/RELIANCE` or `/topic/notifications/42`. Matching is
//! always on the exact topic string; the category split only drives payload
//! decoding.
//!
//! A topic must be non-empty and contain no whitespace or control characters,
//! since it travels as a STOMP header value.

use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Category of per-symbol price topics
pub const STOCK_PRICE: &str = "/topic/stock-price";

/// Topic carrying batches of price updates for every tracked symbol
pub const STOCK_PRICES: &str = "/topic/stock-prices";

/// Topic carrying portfolio change events
pub const PORTFOLIO_UPDATES: &str = "/topic/portfolio-updates";

/// Category of per-user notification topics
pub const NOTIFICATIONS: &str = "/topic/notifications";

/// Application destination prefix for on-demand price refresh requests
pub const PRICE_REQUEST: &str = "/app/stock-price";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic name cannot be empty")]
    Empty,

    #[error("invalid character {0:?} in topic name")]
    InvalidChar(char),

    #[error("entity id cannot be empty")]
    EmptyEntity,
}

/// A validated topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    /// Parse and validate a topic name
    pub fn parse(name: &str) -> Result<Self, TopicError> {
        if name.is_empty() {
            return Err(TopicError::Empty);
        }

        if let Some(c) = name.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(TopicError::InvalidChar(c));
        }

        Ok(Self(name.to_string()))
    }

    /// Build `<category>/<entity>`
    pub fn join(category: &str, entity: impl fmt::Display) -> Result<Self, TopicError> {
        let entity = entity.to_string();
        if entity.is_empty() {
            return Err(TopicError::EmptyEntity);
        }
        Self::parse(&format!("{}/{}", category.trim_end_matches('/'), entity))
    }

    /// Get the topic as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the final `/`, if non-empty
    pub fn category(&self) -> Option<&str> {
        match self.0.rfind('/') {
            Some(0) | None => None,
            Some(idx) => Some(&self.0[..idx]),
        }
    }

    /// Everything after the final `/` (the whole name if there is none)
    pub fn entity(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Per-symbol price topic
    pub fn stock_price(symbol: &str) -> Result<Self, TopicError> {
        Self::join(STOCK_PRICE, symbol)
    }

    /// Per-user notification topic
    pub fn notifications(user_id: impl fmt::Display) -> Result<Self, TopicError> {
        Self::join(NOTIFICATIONS, user_id)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Topic {
    type Error = TopicError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_parse_valid() {
        assert!(Topic::parse("/topic/stock-price/RELIANCE").is_ok());
        assert!(Topic::parse("price/TCS").is_ok());
        assert!(Topic::parse("notify/42").is_ok());
        assert!(Topic::parse("/topic/portfolio-updates").is_ok());
    }

    #[test]
    fn test_topic_parse_invalid() {
        assert_eq!(Topic::parse(""), Err(TopicError::Empty));
        assert_eq!(Topic::parse("price/A B"), Err(TopicError::InvalidChar(' ')));
        assert_eq!(Topic::parse("price\n"), Err(TopicError::InvalidChar('\n')));
        assert_eq!(Topic::parse("a\0b"), Err(TopicError::InvalidChar('\0')));
    }

    #[test]
    fn test_topic_category_and_entity() {
        let topic = Topic::parse("/topic/stock-price/RELIANCE").unwrap();
        assert_eq!(topic.category(), Some("/topic/stock-price"));
        assert_eq!(topic.entity(), "RELIANCE");

        let topic = Topic::parse("price/TCS").unwrap();
        assert_eq!(topic.category(), Some("price"));
        assert_eq!(topic.entity(), "TCS");

        let topic = Topic::parse("/topic").unwrap();
        assert_eq!(topic.category(), None);
        assert_eq!(topic.entity(), "topic");

        let topic = Topic::parse("standalone").unwrap();
        assert_eq!(topic.category(), None);
        assert_eq!(topic.entity(), "standalone");
    }

    #[test]
    fn test_topic_join() {
        let topic = Topic::join("/topic/notifications/", 42).unwrap();
        assert_eq!(topic.as_str(), "/topic/notifications/42");
        assert_eq!(Topic::join("price", ""), Err(TopicError::EmptyEntity));
    }

    #[test]
    fn test_well_known_topics() {
        assert_eq!(
            Topic::stock_price("INFY").unwrap().as_str(),
            "/topic/stock-price/INFY"
        );
        assert_eq!(
            Topic::notifications(7).unwrap().as_str(),
            "/topic/notifications/7"
        );
    }

    #[test]
    fn test_topic_borrow_lookup() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(Topic::parse("price/TCS").unwrap(), 1);
        assert_eq!(map.get("price/TCS"), Some(&1));
        assert_eq!(map.get("price/INFY"), None);
    }
}
