use super::*;
use crate::clock::{Clock, ManualClock};
use std::sync::Arc;

fn limiter(config: RateLimitConfig) -> (RateLimiter, ManualClock) {
    let clock = ManualClock::default();
    let limiter = RateLimiter::with_store(
        config,
        Arc::new(InMemoryRateLimitStore::new()),
        Arc::new(clock.clone()),
    );
    (limiter, clock)
}

fn sliding(max: u32, window_secs: u64) -> RateLimitConfig {
    RateLimitConfig::default().with_limit("op", RateLimit::new(max, Duration::from_secs(window_secs)))
}

#[tokio::test]
async fn test_sliding_window_admits_exactly_max() {
    let (limiter, _clock) = limiter(sliding(5, 60));

    let mut admitted = 0;
    for _ in 0..6 {
        if limiter.check_and_consume("agent-1", "op").await.unwrap().allowed {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 5);
}

#[tokio::test]
async fn test_sliding_window_resets_after_window() {
    let (limiter, clock) = limiter(sliding(2, 60));

    for _ in 0..3 {
        limiter.check_and_consume("agent-1", "op").await.unwrap();
    }
    assert!(!limiter.status("agent-1", "op").await.unwrap().allowed);

    clock.advance(chrono::Duration::seconds(60));

    let status = limiter.status("agent-1", "op").await.unwrap();
    assert!(status.allowed);
    assert_eq!(status.remaining, 2);

    let decision = limiter.check_and_consume("agent-1", "op").await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 1);
}

#[tokio::test]
async fn test_remaining_and_reset_at() {
    let (limiter, clock) = limiter(sliding(3, 60));
    let start = clock.now();

    let first = limiter.check_and_consume("agent-1", "op").await.unwrap();
    assert_eq!(first.remaining, 2);
    assert_eq!(first.reset_at, start + chrono::Duration::seconds(60));

    clock.advance(chrono::Duration::seconds(10));
    let second = limiter.check_and_consume("agent-1", "op").await.unwrap();
    assert_eq!(second.remaining, 1);
    // Still bounded by the oldest entry
    assert_eq!(second.reset_at, start + chrono::Duration::seconds(60));
}

#[tokio::test]
async fn test_status_does_not_consume() {
    let (limiter, _clock) = limiter(sliding(1, 60));

    for _ in 0..10 {
        let status = limiter.status("agent-1", "op").await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 1);
    }

    assert!(limiter.check_and_consume("agent-1", "op").await.unwrap().allowed);
}

#[tokio::test]
async fn test_keys_and_operations_are_independent() {
    let (limiter, _clock) = limiter(sliding(1, 60).with_limit("other", RateLimit::per_hour(1)));

    assert!(limiter.check_and_consume("agent-1", "op").await.unwrap().allowed);
    assert!(limiter.check_and_consume("agent-2", "op").await.unwrap().allowed);
    assert!(limiter.check_and_consume("agent-1", "other").await.unwrap().allowed);
    assert!(!limiter.check_and_consume("agent-1", "op").await.unwrap().allowed);
}

#[tokio::test]
async fn test_unlisted_operation_is_unlimited() {
    let (limiter, _clock) = limiter(RateLimitConfig::default());

    for _ in 0..50 {
        assert!(limiter.check_and_consume("agent-1", "agent_ping").await.unwrap().allowed);
    }
}

#[tokio::test]
async fn test_enforce_maps_denial_to_rate_limited() {
    let (limiter, _clock) = limiter(sliding(1, 60));

    limiter.enforce("agent-1", "op").await.unwrap();
    let err = limiter.enforce("agent-1", "op").await.unwrap_err();

    assert!(matches!(err, X402Error::RateLimited { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_reset_clears_history() {
    let (limiter, _clock) = limiter(sliding(1, 60));

    limiter.check_and_consume("agent-1", "op").await.unwrap();
    assert!(!limiter.status("agent-1", "op").await.unwrap().allowed);

    limiter.reset("agent-1", "op").await.unwrap();
    assert!(limiter.status("agent-1", "op").await.unwrap().allowed);
}

#[tokio::test]
async fn test_concurrent_callers_cannot_over_admit() {
    let limiter = RateLimiter::new(sliding(10, 3600));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.check_and_consume("shared", "op").await.unwrap().allowed
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn test_token_bucket_burst_and_refill() {
    let config = RateLimitConfig::default()
        .with_algorithm(RateLimitAlgorithm::TokenBucket)
        .with_limit("op", RateLimit::new(3, Duration::from_secs(3)));
    let (limiter, clock) = limiter(config);

    for _ in 0..3 {
        assert!(limiter.check_and_consume("agent-1", "op").await.unwrap().allowed);
    }
    let denied = limiter.check_and_consume("agent-1", "op").await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.reset_at, clock.now() + chrono::Duration::seconds(1));

    // One token per second
    clock.advance(chrono::Duration::seconds(1));
    assert!(limiter.check_and_consume("agent-1", "op").await.unwrap().allowed);
    assert!(!limiter.check_and_consume("agent-1", "op").await.unwrap().allowed);

    // Refill is capped at capacity
    clock.advance(chrono::Duration::seconds(60));
    assert_eq!(limiter.status("agent-1", "op").await.unwrap().remaining, 3);
}

#[test]
fn test_algorithm_parsing() {
    assert_eq!(
        "token_bucket".parse::<RateLimitAlgorithm>().unwrap(),
        RateLimitAlgorithm::TokenBucket
    );
    assert!("leaky".parse::<RateLimitAlgorithm>().is_err());
}

#[test]
fn test_default_limits_table() {
    let config = RateLimitConfig::default();
    assert_eq!(config.limits["payment_create"], RateLimit::per_hour(100));
    assert_eq!(config.limits["payment_get"], RateLimit::per_hour(1000));
    assert!(config.validate().is_ok());
}

#[test]
fn test_zero_request_limit_is_rejected() {
    let config = RateLimitConfig::default().with_limit("op", RateLimit::new(0, Duration::from_secs(60)));
    assert!(matches!(config.validate(), Err(X402Error::Config(_))));
}

#[tokio::test]
async fn test_empty_bucket_reports_finite_reset() {
    let config = RateLimitConfig::default()
        .with_algorithm(RateLimitAlgorithm::TokenBucket)
        .with_limit("op", RateLimit::new(0, Duration::from_secs(60)));
    let (limiter, clock) = limiter(config);

    let denied = limiter.check_and_consume("agent-1", "op").await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.reset_at, clock.now() + chrono::Duration::seconds(60));

    let status = limiter.status("agent-1", "op").await.unwrap();
    assert!(!status.allowed);
    assert_eq!(status.reset_at, clock.now() + chrono::Duration::seconds(60));
}
