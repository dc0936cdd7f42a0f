//! Typed payloads carried in delivery frames
//!
//! Bodies are JSON. Which shape a body has depends on the topic's category,
//! so decoding happens once per frame at the dispatch boundary and callbacks
//! receive a [`Payload`] rather than raw bytes.

use crate::error::{RealtimeError, Result};
use crate::topics::{self, Topic};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single live price tick for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_close: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
}

impl PriceUpdate {
    /// Fill `change` and `change_percent` from the current price and previous close
    ///
    /// Leaves both untouched unless the previous close is positive.
    pub fn compute_change(&mut self) {
        if let (Some(current), Some(previous)) = (self.current_price, self.previous_close) {
            if previous > 0.0 {
                let change = current - previous;
                self.change = Some(change);
                self.change_percent = Some((change / previous * 100.0 * 100.0).round() / 100.0);
            }
        }
    }
}

/// Notification category as assigned by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationType {
    Alert,
    Reminder,
    Warning,
    LendingDue,
    LendingOverdue,
    Other(String),
}

impl From<String> for NotificationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ALERT" => Self::Alert,
            "REMINDER" => Self::Reminder,
            "WARNING" => Self::Warning,
            "LENDING_DUE" => Self::LendingDue,
            "LENDING_OVERDUE" => Self::LendingOverdue,
            _ => Self::Other(value),
        }
    }
}

impl From<NotificationType> for String {
    fn from(value: NotificationType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alert => f.write_str("ALERT"),
            Self::Reminder => f.write_str("REMINDER"),
            Self::Warning => f.write_str("WARNING"),
            Self::LendingDue => f.write_str("LENDING_DUE"),
            Self::LendingOverdue => f.write_str("LENDING_OVERDUE"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// A per-user notification pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub read_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub alert_rule_id: Option<i64>,
    #[serde(default)]
    pub channel: Option<String>,
}

/// Decoded body of a delivery frame
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Price(PriceUpdate),
    PriceBatch(Vec<PriceUpdate>),
    Notification(Notification),
    Json(serde_json::Value),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Price(_) => PayloadKind::Price,
            Payload::PriceBatch(_) => PayloadKind::PriceBatch,
            Payload::Notification(_) => PayloadKind::Notification,
            Payload::Json(_) => PayloadKind::Json,
        }
    }

    pub fn as_price(&self) -> Option<&PriceUpdate> {
        match self {
            Payload::Price(update) => Some(update),
            _ => None,
        }
    }

    pub fn as_notification(&self) -> Option<&Notification> {
        match self {
            Payload::Notification(notification) => Some(notification),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Expected body shape for a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Price,
    PriceBatch,
    Notification,
    Json,
}

/// Maps a topic or topic category to a body shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRule {
    pub pattern: String,
    pub kind: PayloadKind,
}

impl DecodeRule {
    fn matches(&self, topic: &Topic) -> bool {
        topic.as_str() == self.pattern || topic.category() == Some(self.pattern.as_str())
    }
}

/// Ordered decode rules; the first matching rule wins, otherwise `Json`
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
    rules: Vec<DecodeRule>,
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        Self {
            rules: vec![
                DecodeRule {
                    pattern: topics::STOCK_PRICES.to_string(),
                    kind: PayloadKind::PriceBatch,
                },
                DecodeRule {
                    pattern: topics::STOCK_PRICE.to_string(),
                    kind: PayloadKind::Price,
                },
                DecodeRule {
                    pattern: topics::NOTIFICATIONS.to_string(),
                    kind: PayloadKind::Notification,
                },
            ],
        }
    }
}

impl PayloadDecoder {
    /// A decoder with no rules: every body decodes as `Json`
    pub fn json_only() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule ahead of the existing ones
    pub fn with_rule(mut self, pattern: impl Into<String>, kind: PayloadKind) -> Self {
        self.rules.insert(
            0,
            DecodeRule {
                pattern: pattern.into(),
                kind,
            },
        );
        self
    }

    pub fn rules(&self) -> &[DecodeRule] {
        &self.rules
    }

    pub fn kind_for(&self, topic: &Topic) -> PayloadKind {
        self.rules
            .iter()
            .find(|rule| rule.matches(topic))
            .map(|rule| rule.kind)
            .unwrap_or(PayloadKind::Json)
    }

    /// Decode a body according to the rule for `topic`
    pub fn decode(&self, topic: &Topic, body: &[u8]) -> Result<Payload> {
        let malformed = |e: serde_json::Error| {
            RealtimeError::MalformedFrame(format!("{} body: {}", topic, e))
        };

        let payload = match self.kind_for(topic) {
            PayloadKind::Price => Payload::Price(serde_json::from_slice(body).map_err(malformed)?),
            PayloadKind::PriceBatch => {
                Payload::PriceBatch(serde_json::from_slice(body).map_err(malformed)?)
            }
            PayloadKind::Notification => {
                Payload::Notification(serde_json::from_slice(body).map_err(malformed)?)
            }
            PayloadKind::Json => Payload::Json(serde_json::from_slice(body).map_err(malformed)?),
        };

        Ok(payload)
    }
}
