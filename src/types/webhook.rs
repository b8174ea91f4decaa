//! Webhook delivery types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Delivery state of a webhook record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event destined for one subscriber URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDeliveryRecord {
    /// Delivery id, also sent as the delivery header
    pub id: String,
    pub target_url: String,
    pub event_type: String,
    pub payload: Value,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_response_code: Option<u16>,
    pub last_response_body: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by every stored update
    #[serde(default)]
    pub version: u64,
}

impl WebhookDeliveryRecord {
    /// Create a pending record
    pub fn new(
        target_url: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_url: target_url.into(),
            event_type: event_type.into(),
            payload,
            status: DeliveryStatus::Pending,
            attempts: 0,
            max_attempts,
            last_response_code: None,
            last_response_body: None,
            last_error: None,
            created_at: now,
            delivered_at: None,
            updated_at: now,
            version: 0,
        }
    }

    /// Delivered or out of attempts
    pub fn is_terminal(&self) -> bool {
        self.status != DeliveryStatus::Pending
    }
}

/// A subscriber endpoint and the events it wants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub url: String,
    /// Event types to deliver; empty means all
    #[serde(default)]
    pub events: Vec<String>,
}

impl WebhookSubscription {
    /// Subscribe to every event
    pub fn all(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: Vec::new(),
        }
    }

    /// Subscribe to a fixed set of events
    pub fn for_events(url: impl Into<String>, events: &[&str]) -> Self {
        Self {
            url: url.into(),
            events: events.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn wants(&self, event_type: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event_type)
    }
}

/// Delivery counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookStats {
    pub total: usize,
    pub pending: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_filter() {
        let all = WebhookSubscription::all("https://agent.example/hooks");
        assert!(all.wants("payment.settled"));

        let settled_only =
            WebhookSubscription::for_events("https://agent.example/hooks", &["payment.settled"]);
        assert!(settled_only.wants("payment.settled"));
        assert!(!settled_only.wants("payment.created"));
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = WebhookDeliveryRecord::new(
            "https://agent.example/hooks",
            "payment.created",
            serde_json::json!({"id": "abc"}),
            5,
        );
        assert_eq!(record.status, DeliveryStatus::Pending);
        assert_eq!(record.attempts, 0);
        assert!(!record.is_terminal());
    }
}
