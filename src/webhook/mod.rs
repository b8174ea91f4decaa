//! Signed webhook delivery with retries
//!
//! Facilitator events are fanned out to subscribers as
//! [`WebhookDeliveryRecord`]s. Enqueueing persists the record and returns;
//! delivery runs on its own task so a slow subscriber never holds up a state
//! transition.
//!
//! Each attempt POSTs the canonical JSON payload with these headers:
//!
//! - `X-X402-Event`: event type
//! - `X-X402-Delivery`: delivery record id
//! - `X-X402-Signature`: `sha256=<hex>` HMAC-SHA256 of the body
//!
//! Non-2xx answers and transport errors are retried on a fixed backoff
//! schedule until `max_attempts`; the record is then `failed` and stays that
//! way until redriven.

use crate::clock::{self, SharedClock};
use crate::crypto::hmac::{canonical_json, compute_signature, verify_signature};
use crate::rate_limit::RateLimiter;
use crate::storage::WebhookRepository;
use crate::types::constants::operations;
use crate::types::{DeliveryStatus, WebhookDeliveryRecord, WebhookStats, WebhookSubscription};
use crate::{Result, X402Error};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub mod transport;


pub use transport::{HttpTransport, TransportResponse, WebhookTransport};

pub const EVENT_HEADER: &str = "X-X402-Event";
pub const DELIVERY_HEADER: &str = "X-X402-Delivery";
pub const SIGNATURE_HEADER: &str = "X-X402-Signature";

/// Longest wait for a rate-limit window to reopen before retrying admission
const MAX_ADMISSION_WAIT: Duration = Duration::from_secs(60);

/// Consumer of facilitator domain events
///
/// Publishing never fails from the caller's point of view; sinks log their
/// own errors.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event_type: &str, payload: Value);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn publish(&self, _event_type: &str, _payload: Value) {}
}

/// Delivery settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Shared HMAC secret
    pub secret: String,
    /// Per-attempt request timeout
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Wait after the k-th failed attempt is `backoff[k - 1]` (last entry repeats)
    pub backoff: Vec<Duration>,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            timeout: Duration::from_secs(30),
            max_attempts: 5,
            backoff: [1, 5, 15, 60, 300]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            user_agent: format!("x402-settlement/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(X402Error::config("Webhook secret is required"));
        }
        if self.max_attempts == 0 {
            return Err(X402Error::config("Webhook max_attempts must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(X402Error::config("Webhook timeout must be positive"));
        }
        Ok(())
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Wait before the next attempt after `failed_attempts` failures
    pub fn backoff_after(&self, failed_attempts: u32) -> Duration {
        let index = failed_attempts.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Persists, signs and delivers webhook events
#[derive(Clone)]
pub struct WebhookDispatcher {
    config: Arc<WebhookConfig>,
    repository: Arc<dyn WebhookRepository>,
    transport: Arc<dyn WebhookTransport>,
    subscriptions: Arc<RwLock<Vec<WebhookSubscription>>>,
    rate_limiter: Option<RateLimiter>,
    clock: SharedClock,
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("subscriptions", &self.subscriptions().len())
            .field("max_attempts", &self.config.max_attempts)
            .finish()
    }
}

impl WebhookDispatcher {
    pub fn new(
        config: WebhookConfig,
        repository: Arc<dyn WebhookRepository>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            repository,
            transport,
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            rate_limiter: None,
            clock: clock::system(),
        }
    }

    /// Throttle deliveries per target URL with the `webhook_send` limit
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Register a subscriber; replaces an existing subscription for the same URL
    pub fn subscribe(&self, subscription: WebhookSubscription) -> Result<()> {
        let parsed = url::Url::parse(&subscription.url).map_err(|e| {
            X402Error::validation(format!("Invalid webhook URL {}: {}", subscription.url, e))
        })?;
        match parsed.scheme() {
            "https" => {}
            "http" => tracing::warn!(
                url = %subscription.url,
                "webhook URL does not use HTTPS; payloads will be sent in cleartext"
            ),
            other => {
                return Err(X402Error::validation(format!(
                    "Unsupported webhook URL scheme: {}",
                    other
                )))
            }
        }

        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        subscriptions.retain(|s| s.url != subscription.url);
        tracing::info!(url = %subscription.url, events = ?subscription.events, "webhook subscribed");
        subscriptions.push(subscription);
        Ok(())
    }

    /// Remove a subscriber; returns whether it existed
    pub fn unsubscribe(&self, url: &str) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = subscriptions.len();
        subscriptions.retain(|s| s.url != url);
        before != subscriptions.len()
    }

    pub fn subscriptions(&self) -> Vec<WebhookSubscription> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Persist a pending record and start delivering it in the background
    pub async fn enqueue(
        &self,
        target_url: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<WebhookDeliveryRecord> {
        let record = self.persist(target_url, event_type, payload).await?;
        self.spawn_delivery(record.id.clone());
        Ok(record)
    }

    /// Persist a pending record without delivering it
    pub async fn persist(
        &self,
        target_url: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<WebhookDeliveryRecord> {
        let now = self.clock.now();
        let mut record = WebhookDeliveryRecord::new(
            target_url,
            event_type,
            payload,
            self.config.max_attempts,
        );
        record.created_at = now;
        record.updated_at = now;

        self.repository.insert(record.clone()).await?;
        tracing::debug!(delivery_id = %record.id, event = %event_type, url = %target_url, "webhook enqueued");
        Ok(record)
    }

    fn spawn_delivery(&self, id: String) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.run_delivery(&id).await {
                tracing::error!(delivery_id = %id, error = %e, "webhook delivery loop aborted");
            }
        });
    }

    /// Enqueue `payload` for every subscriber that wants `event_type`
    pub async fn dispatch(&self, event_type: &str, payload: Value) -> Result<Vec<WebhookDeliveryRecord>> {
        let targets: Vec<String> = self
            .subscriptions()
            .into_iter()
            .filter(|s| s.wants(event_type))
            .map(|s| s.url)
            .collect();

        let mut records = Vec::with_capacity(targets.len());
        for url in targets {
            records.push(self.enqueue(&url, event_type, payload.clone()).await?);
        }
        Ok(records)
    }

    /// Attempt delivery until the record is delivered or out of attempts
    pub async fn run_delivery(&self, id: &str) -> Result<WebhookDeliveryRecord> {
        loop {
            let record = self.deliver(id).await?;
            if record.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(self.config.backoff_after(record.attempts)).await;
        }
    }

    /// Make one delivery attempt
    ///
    /// Terminal records are returned unchanged.
    pub async fn deliver(&self, id: &str) -> Result<WebhookDeliveryRecord> {
        let mut record = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| X402Error::not_found(format!("Webhook delivery {}", id)))?;
        if record.is_terminal() {
            return Ok(record);
        }
        let expected_version = record.version;

        self.await_admission(&record).await?;

        let body = canonical_json(&record.payload)?;
        let signature = compute_signature(self.config.secret.as_bytes(), &body)?;
        let headers = [
            ("Content-Type", "application/json".to_string()),
            ("User-Agent", self.config.user_agent.clone()),
            (EVENT_HEADER, record.event_type.clone()),
            (DELIVERY_HEADER, record.id.clone()),
            (SIGNATURE_HEADER, signature),
        ];

        let outcome = self
            .transport
            .post(&record.target_url, &headers, body, self.config.timeout)
            .await;

        record.attempts += 1;
        let now = self.clock.now();
        record.updated_at = now;

        match outcome {
            Ok(response) => {
                record.last_response_code = Some(response.status);
                record.last_response_body = Some(response.body.clone());
                if response.is_success() {
                    record.status = DeliveryStatus::Delivered;
                    record.delivered_at = Some(now);
                    record.last_error = None;
                } else {
                    record.last_error = Some(format!("HTTP {}", response.status));
                }
            }
            Err(e) => {
                record.last_response_code = None;
                record.last_response_body = None;
                record.last_error = Some(e.to_string());
            }
        }

        if record.status == DeliveryStatus::Pending && record.attempts >= record.max_attempts {
            record.status = DeliveryStatus::Failed;
        }

        match record.status {
            DeliveryStatus::Delivered => tracing::info!(
                delivery_id = %record.id,
                event = %record.event_type,
                url = %record.target_url,
                attempts = record.attempts,
                "webhook delivered"
            ),
            DeliveryStatus::Failed => tracing::error!(
                delivery_id = %record.id,
                event = %record.event_type,
                url = %record.target_url,
                attempts = record.attempts,
                error = record.last_error.as_deref().unwrap_or_default(),
                "webhook delivery failed permanently"
            ),
            DeliveryStatus::Pending => tracing::warn!(
                delivery_id = %record.id,
                url = %record.target_url,
                attempt = record.attempts,
                max_attempts = record.max_attempts,
                error = record.last_error.as_deref().unwrap_or_default(),
                "webhook attempt failed, will retry"
            ),
        }

        if !self
            .repository
            .compare_and_swap(record.clone(), expected_version)
            .await?
        {
            tracing::warn!(
                delivery_id = %record.id,
                attempt = record.attempts,
                "webhook record changed during attempt, keeping stored state"
            );
            return self
                .repository
                .get(id)
                .await?
                .ok_or_else(|| X402Error::not_found(format!("Webhook delivery {}", id)));
        }
        record.version = expected_version + 1;
        Ok(record)
    }

    async fn await_admission(&self, record: &WebhookDeliveryRecord) -> Result<()> {
        let Some(limiter) = &self.rate_limiter else {
            return Ok(());
        };

        loop {
            let decision = limiter
                .check_and_consume(&record.target_url, operations::WEBHOOK_SEND)
                .await?;
            if decision.allowed {
                return Ok(());
            }

            let wait = (decision.reset_at - self.clock.now())
                .to_std()
                .unwrap_or_default()
                .clamp(Duration::from_millis(10), MAX_ADMISSION_WAIT);
            tracing::debug!(delivery_id = %record.id, url = %record.target_url, ?wait, "webhook send throttled");
            tokio::time::sleep(wait).await;
        }
    }

    /// Reset a failed record and deliver it again
    pub async fn redrive(&self, id: &str) -> Result<WebhookDeliveryRecord> {
        let mut record = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| X402Error::not_found(format!("Webhook delivery {}", id)))?;
        if record.status != DeliveryStatus::Failed {
            return Err(X402Error::invalid_state(format!(
                "Webhook delivery {} is {}, only failed deliveries can be redriven",
                id, record.status
            )));
        }

        let expected_version = record.version;
        record.status = DeliveryStatus::Pending;
        record.attempts = 0;
        record.last_error = None;
        record.updated_at = self.clock.now();
        // Only the redrive that wins the swap starts a delivery loop
        if !self
            .repository
            .compare_and_swap(record.clone(), expected_version)
            .await?
        {
            return Err(X402Error::invalid_state(format!(
                "Webhook delivery {} was redriven concurrently",
                id
            )));
        }
        record.version = expected_version + 1;

        tracing::info!(delivery_id = %id, url = %record.target_url, "webhook redriven");
        self.spawn_delivery(record.id.clone());
        Ok(record)
    }

    /// Redrive every failed record; returns the redriven ids
    pub async fn redrive_failed(&self) -> Result<Vec<String>> {
        let failed = self
            .repository
            .list_by_status(DeliveryStatus::Failed)
            .await?;
        let mut ids = Vec::with_capacity(failed.len());
        for record in failed {
            self.redrive(&record.id).await?;
            ids.push(record.id);
        }
        Ok(ids)
    }

    pub async fn get(&self, id: &str) -> Result<Option<WebhookDeliveryRecord>> {
        self.repository.get(id).await
    }

    /// Delivery counts by status
    pub async fn stats(&self) -> Result<WebhookStats> {
        let pending = self
            .repository
            .list_by_status(DeliveryStatus::Pending)
            .await?
            .len();
        let delivered = self
            .repository
            .list_by_status(DeliveryStatus::Delivered)
            .await?
            .len();
        let failed = self
            .repository
            .list_by_status(DeliveryStatus::Failed)
            .await?
            .len();

        Ok(WebhookStats {
            total: pending + delivered + failed,
            pending,
            delivered,
            failed,
        })
    }

    /// Check a received body against its signature header with our secret
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        verify_signature(self.config.secret.as_bytes(), body, signature)
    }
}

#[async_trait]
impl EventSink for WebhookDispatcher {
    async fn publish(&self, event_type: &str, payload: Value) {
        if let Err(e) = self.dispatch(event_type, payload).await {
            tracing::error!(event = %event_type, error = %e, "failed to enqueue webhook event");
        }
    }
}
