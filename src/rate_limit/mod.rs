//! Admission control per (caller, operation)
//!
//! Two algorithms are available:
//!
//! - **Sliding-window log** (default): every attempt is timestamped; entries
//!   older than the window are purged before counting, and the attempt is
//!   recorded whether or not it is admitted.
//! - **Token bucket**: for callers that need burst tolerance. Tokens refill
//!   continuously at `max_requests / window` per second, one per admitted call.
//!
//! The purge, count, decide and record steps for one key happen inside a
//! single [`RateLimitStore`] call, which each backend makes atomic.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;
#[cfg(test)]
mod tests;

pub use memory::InMemoryRateLimitStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisRateLimitStore;

use crate::clock::{self, SharedClock};
use crate::types::operations;
use crate::{Result, X402Error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    SlidingWindow,
    TokenBucket,
}

impl FromStr for RateLimitAlgorithm {
    type Err = X402Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sliding_window" => Ok(Self::SlidingWindow),
            "token_bucket" => Ok(Self::TokenBucket),
            other => Err(X402Error::config(format!(
                "Unknown rate limit algorithm: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RateLimitAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlidingWindow => f.write_str("sliding_window"),
            Self::TokenBucket => f.write_str("token_bucket"),
        }
    }
}

/// Requests allowed per window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// `max_requests` per hour
    pub fn per_hour(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(3600))
    }

    pub(crate) fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }

    /// When a bucket holding `tokens` will next have a whole token
    ///
    /// Never later than one window from `now`, so a zero refill rate still
    /// yields a finite reset time.
    pub(crate) fn next_token_at(&self, tokens: f64, now: DateTime<Utc>) -> DateTime<Utc> {
        if tokens >= 1.0 {
            return now;
        }
        let window_ms = self.window_millis();
        let rate = self.refill_per_second();
        let wait_ms = if rate > 0.0 {
            let wait = ((1.0 - tokens) / rate * 1000.0).ceil();
            if wait.is_finite() {
                (wait as i64).clamp(0, window_ms)
            } else {
                window_ms
            }
        } else {
            window_ms
        };
        now.checked_add_signed(chrono::Duration::milliseconds(wait_ms))
            .unwrap_or(now)
    }

    /// Token-bucket refill rate in tokens per second
    pub(crate) fn refill_per_second(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs > 0.0 {
            f64::from(self.max_requests) / secs
        } else {
            f64::from(self.max_requests)
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Further requests admissible in the current window
    pub remaining: u32,
    /// When the oldest counted request leaves the window (or the next token
    /// arrives)
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    fn unlimited(now: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining: u32::MAX,
            reset_at: now,
        }
    }
}

/// Shared key/value state behind the limiter
///
/// Each method must apply its whole read-decide-write sequence atomically
/// with respect to other callers using the same key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Sliding-window log check; records the attempt when `consume` is set
    async fn sliding_window(
        &self,
        key: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
        consume: bool,
    ) -> Result<RateLimitDecision>;

    /// Token-bucket check; takes a token when `consume` is set and one is
    /// available
    async fn token_bucket(
        &self,
        key: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
        consume: bool,
    ) -> Result<RateLimitDecision>;

    /// Drop all state for a key
    async fn clear(&self, key: &str) -> Result<()>;
}

/// Limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub algorithm: RateLimitAlgorithm,
    /// Limits by operation name; operations without an entry are unlimited
    pub limits: HashMap<String, RateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let limits = [
            (operations::PAYMENT_CREATE, RateLimit::per_hour(100)),
            (operations::PAYMENT_VERIFY, RateLimit::per_hour(500)),
            (operations::PAYMENT_SETTLE, RateLimit::per_hour(500)),
            (operations::PAYMENT_CANCEL, RateLimit::per_hour(100)),
            (operations::PAYMENT_GET, RateLimit::per_hour(1000)),
            (operations::WEBHOOK_SEND, RateLimit::per_hour(1000)),
            (operations::EXCHANGE_RATE, RateLimit::per_hour(10000)),
        ]
        .into_iter()
        .map(|(op, limit)| (op.to_string(), limit))
        .collect();

        Self {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            limits,
        }
    }
}

impl RateLimitConfig {
    /// Set the algorithm
    pub fn with_algorithm(mut self, algorithm: RateLimitAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set or replace the limit for one operation
    pub fn with_limit(mut self, operation: impl Into<String>, limit: RateLimit) -> Self {
        self.limits.insert(operation.into(), limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (operation, limit) in &self.limits {
            if limit.max_requests == 0 {
                return Err(X402Error::config(format!(
                    "Rate limit for {} must allow at least one request",
                    operation
                )));
            }
            if limit.window.is_zero() {
                return Err(X402Error::config(format!(
                    "Rate limit window for {} must be positive",
                    operation
                )));
            }
        }
        Ok(())
    }
}

/// Per-caller, per-operation admission control
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    clock: SharedClock,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

impl RateLimiter {
    /// In-memory limiter on the system clock
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryRateLimitStore::new()), clock::system())
    }

    /// Limiter over an explicit store and clock
    pub fn with_store(
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn storage_key(&self, key: &str, operation: &str) -> String {
        match self.config.algorithm {
            RateLimitAlgorithm::SlidingWindow => format!("rate_limit:{}:{}", key, operation),
            RateLimitAlgorithm::TokenBucket => format!("token_bucket:{}:{}", key, operation),
        }
    }

    async fn evaluate(&self, key: &str, operation: &str, consume: bool) -> Result<RateLimitDecision> {
        let now = self.clock.now();
        let Some(limit) = self.config.limits.get(operation) else {
            return Ok(RateLimitDecision::unlimited(now));
        };

        let storage_key = self.storage_key(key, operation);
        match self.config.algorithm {
            RateLimitAlgorithm::SlidingWindow => {
                self.store
                    .sliding_window(&storage_key, limit, now, consume)
                    .await
            }
            RateLimitAlgorithm::TokenBucket => {
                self.store
                    .token_bucket(&storage_key, limit, now, consume)
                    .await
            }
        }
    }

    /// Decide admission for one call and record it
    pub async fn check_and_consume(&self, key: &str, operation: &str) -> Result<RateLimitDecision> {
        let decision = self.evaluate(key, operation, true).await?;
        if !decision.allowed {
            tracing::warn!(
                caller = %key,
                operation = %operation,
                reset_at = %decision.reset_at,
                "rate limit exceeded"
            );
        }
        Ok(decision)
    }

    /// [`check_and_consume`](Self::check_and_consume), turning a denial into
    /// `X402Error::RateLimited`
    pub async fn enforce(&self, key: &str, operation: &str) -> Result<RateLimitDecision> {
        let decision = self.check_and_consume(key, operation).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(X402Error::RateLimited {
                key: key.to_string(),
                operation: operation.to_string(),
                reset_at: decision.reset_at,
            })
        }
    }

    /// Current standing without recording anything
    pub async fn status(&self, key: &str, operation: &str) -> Result<RateLimitDecision> {
        self.evaluate(key, operation, false).await
    }

    /// Standing of a caller across every limited operation
    pub async fn status_all(&self, key: &str) -> Result<Vec<(String, RateLimitDecision)>> {
        let mut operations: Vec<&String> = self.config.limits.keys().collect();
        operations.sort();

        let mut all = Vec::with_capacity(operations.len());
        for operation in operations {
            all.push((operation.clone(), self.status(key, operation).await?));
        }
        Ok(all)
    }

    /// Forget a caller's history for one operation
    pub async fn reset(&self, key: &str, operation: &str) -> Result<()> {
        self.store.clear(&self.storage_key(key, operation)).await?;
        tracing::info!(caller = %key, operation = %operation, "rate limit reset");
        Ok(())
    }
}
