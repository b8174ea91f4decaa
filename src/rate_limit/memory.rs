//! In-process rate-limit state

use super::{RateLimit, RateLimitDecision, RateLimitStore};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// `DashMap`-backed store for a single facilitator process
///
/// The entry guard for a key is held across purge, count and record, so
/// concurrent callers sharing a key cannot both take the last slot.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
    buckets: DashMap<String, Bucket>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn window_span(limit: &RateLimit) -> chrono::Duration {
    chrono::Duration::milliseconds(limit.window_millis())
}

fn refill(bucket: &Bucket, limit: &RateLimit, now: DateTime<Utc>) -> f64 {
    let elapsed_ms = (now - bucket.last_refill).num_milliseconds().max(0);
    let refilled = bucket.tokens + (elapsed_ms as f64 / 1000.0) * limit.refill_per_second();
    refilled.min(f64::from(limit.max_requests))
}

fn bucket_decision(tokens: f64, allowed: bool, limit: &RateLimit, now: DateTime<Utc>) -> RateLimitDecision {
    RateLimitDecision {
        allowed,
        remaining: tokens.floor().max(0.0) as u32,
        reset_at: limit.next_token_at(tokens, now),
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn sliding_window(
        &self,
        key: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
        consume: bool,
    ) -> Result<RateLimitDecision> {
        let span = window_span(limit);
        let cutoff = now - span;
        let max = limit.max_requests as usize;

        if !consume {
            let (count, oldest) = match self.windows.get(key) {
                Some(log) => {
                    let live: Vec<_> = log.iter().filter(|t| **t > cutoff).collect();
                    (live.len(), live.first().map(|t| **t))
                }
                None => (0, None),
            };
            return Ok(RateLimitDecision {
                allowed: count < max,
                remaining: max.saturating_sub(count) as u32,
                reset_at: oldest.unwrap_or(now) + span,
            });
        }

        let mut log = self.windows.entry(key.to_string()).or_default();
        while log.front().is_some_and(|t| *t <= cutoff) {
            log.pop_front();
        }

        let count = log.len();
        let allowed = count < max;
        log.push_back(now);

        let oldest = log.front().copied().unwrap_or(now);
        Ok(RateLimitDecision {
            allowed,
            remaining: if allowed { (max - count - 1) as u32 } else { 0 },
            reset_at: oldest + span,
        })
    }

    async fn token_bucket(
        &self,
        key: &str,
        limit: &RateLimit,
        now: DateTime<Utc>,
        consume: bool,
    ) -> Result<RateLimitDecision> {
        let capacity = f64::from(limit.max_requests);

        if !consume {
            let tokens = self
                .buckets
                .get(key)
                .map(|b| refill(&b, limit, now))
                .unwrap_or(capacity);
            return Ok(bucket_decision(tokens, tokens >= 1.0, limit, now));
        }

        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let mut tokens = refill(&bucket, limit, now);
        let allowed = tokens >= 1.0;
        if allowed {
            tokens -= 1.0;
        }
        bucket.tokens = tokens;
        bucket.last_refill = now;

        Ok(bucket_decision(tokens, allowed, limit, now))
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.windows.remove(key);
        self.buckets.remove(key);
        Ok(())
    }
}
