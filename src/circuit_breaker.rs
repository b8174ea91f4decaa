//! Per-dependency circuit breaker
//!
//! Each external dependency (every blockchain network plus the exchange-rate
//! provider chain) gets its own record. Records live in a [`DashMap`], so a
//! state transition locks one dependency's shard and never the whole table.
//!
//! ```text
//!            failure_threshold failures
//!   CLOSED ───────────────────────────────▶ OPEN
//!     ▲                                      │ recovery_timeout elapsed
//!     │ success_threshold successes          ▼ (checked by is_open)
//!     └──────────────────────────────── HALF_OPEN ──failure──▶ OPEN
//! ```

use crate::clock::{self, SharedClock};
use crate::{Result, X402Error};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds for one dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Cooldown before an OPEN circuit admits a probe
    pub recovery_timeout: Duration,
    /// Consecutive HALF_OPEN successes that close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate the thresholds
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(X402Error::config(
                "Circuit breaker thresholds must be at least 1",
            ));
        }
        Ok(())
    }
}

/// State of one dependency's breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    pub name: String,
    pub state: CircuitState,
    /// Consecutive failures; live while CLOSED
    pub failure_count: u32,
    /// Consecutive probe successes; live while HALF_OPEN
    pub success_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    /// A HALF_OPEN probe has been handed out and not yet reported
    pub probe_in_flight: bool,
}

impl CircuitBreakerRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breakers for a set of named dependencies
#[derive(Debug)]
pub struct CircuitBreaker {
    records: DashMap<String, CircuitBreakerRecord>,
    default_config: CircuitBreakerConfig,
    overrides: DashMap<String, CircuitBreakerConfig>,
    clock: SharedClock,
}

impl CircuitBreaker {
    /// Create breakers sharing one default configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, clock::system())
    }

    /// Create breakers reading time from `clock`
    pub fn with_clock(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            default_config: config,
            overrides: DashMap::new(),
            clock,
        }
    }

    /// Use different thresholds for one dependency
    pub fn with_dependency_config(self, name: &str, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(name.to_string(), config);
        self
    }

    fn config_for(&self, name: &str) -> CircuitBreakerConfig {
        self.overrides
            .get(name)
            .map(|c| *c)
            .unwrap_or(self.default_config)
    }

    /// Whether calls to `name` must fail fast
    ///
    /// When an OPEN circuit's recovery timeout has elapsed, this call moves it
    /// to HALF_OPEN and hands the caller the single probe (returns `false`).
    /// Other callers keep seeing `true` until that probe is reported.
    pub fn is_open(&self, name: &str) -> bool {
        self.admit(name) == Admission::Rejected
    }

    fn admit(&self, name: &str) -> Admission {
        let config = self.config_for(name);
        let now = self.clock.now();

        // The entry guard holds the shard lock for the whole check-and-transition
        let mut record = self
            .records
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreakerRecord::new(name));

        match record.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled_down = record
                    .last_failure
                    .map(|at| elapsed(at, now) >= config.recovery_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    record.state = CircuitState::HalfOpen;
                    record.failure_count = 0;
                    record.success_count = 0;
                    record.probe_in_flight = true;
                    tracing::info!(dependency = %name, "circuit half-open, admitting probe");
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if record.probe_in_flight {
                    Admission::Rejected
                } else {
                    record.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Hand back a probe whose caller went away without reporting
    fn release_probe(&self, name: &str) {
        if let Some(mut record) = self.records.get_mut(name) {
            if record.state == CircuitState::HalfOpen && record.probe_in_flight {
                record.probe_in_flight = false;
                tracing::debug!(dependency = %name, "abandoned probe released");
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self, name: &str) {
        let config = self.config_for(name);
        let mut record = self
            .records
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreakerRecord::new(name));

        match record.state {
            CircuitState::Closed => {
                record.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                record.success_count += 1;
                record.probe_in_flight = false;
                if record.success_count >= config.success_threshold {
                    record.state = CircuitState::Closed;
                    record.failure_count = 0;
                    record.success_count = 0;
                    tracing::info!(dependency = %name, "circuit closed");
                }
            }
            // Late result from a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, name: &str) {
        let config = self.config_for(name);
        let now = self.clock.now();
        let mut record = self
            .records
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreakerRecord::new(name));

        record.last_failure = Some(now);

        match record.state {
            CircuitState::Closed => {
                record.failure_count += 1;
                if record.failure_count >= config.failure_threshold {
                    record.state = CircuitState::Open;
                    tracing::warn!(
                        dependency = %name,
                        failures = record.failure_count,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                record.state = CircuitState::Open;
                record.success_count = 0;
                record.failure_count = config.failure_threshold;
                record.probe_in_flight = false;
                tracing::warn!(dependency = %name, "probe failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state without side effects
    pub fn state(&self, name: &str) -> CircuitState {
        self.records
            .get(name)
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshot of one dependency's record
    pub fn snapshot(&self, name: &str) -> CircuitBreakerRecord {
        self.records
            .get(name)
            .map(|r| r.clone())
            .unwrap_or_else(|| CircuitBreakerRecord::new(name))
    }

    /// Snapshots of every dependency seen so far
    pub fn snapshots(&self) -> Vec<CircuitBreakerRecord> {
        let mut all: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Force a dependency back to CLOSED
    pub fn reset(&self, name: &str) {
        self.records
            .insert(name.to_string(), CircuitBreakerRecord::new(name));
        tracing::info!(dependency = %name, "circuit reset");
    }

    /// Run `call` through the breaker for `name`
    ///
    /// Fails fast with `DependencyUnavailable` while the circuit is open.
    /// Transport failures and timeouts count against the dependency; a
    /// well-formed business answer (insufficient funds, unknown token, ...)
    /// counts as a success because the dependency did respond.
    pub async fn call<T, F>(&self, name: &str, timeout: Option<Duration>, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let admission = self.admit(name);
        if admission == Admission::Rejected {
            return Err(X402Error::dependency_unavailable(name, "circuit open"));
        }
        // Dropping this future mid-call must not strand the probe
        let mut probe = ProbeGuard {
            breaker: self,
            name,
            armed: admission == Admission::Probe,
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    probe.armed = false;
                    self.record_failure(name);
                    return Err(X402Error::dependency_unavailable(
                        name,
                        format!("timed out after {:?}", limit),
                    ));
                }
            },
            None => call.await,
        };
        probe.armed = false;

        match outcome {
            Ok(value) => {
                self.record_success(name);
                Ok(value)
            }
            Err(e) if counts_as_dependency_failure(&e) => {
                self.record_failure(name);
                tracing::debug!(dependency = %name, error = %e, "dependency call failed");
                Err(match e {
                    X402Error::DependencyUnavailable { .. } => e,
                    other => X402Error::dependency_unavailable(name, other.to_string()),
                })
            }
            Err(e) => {
                self.record_success(name);
                Err(e)
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Allowed,
    Probe,
    Rejected,
}

struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    name: &'a str,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe(self.name);
        }
    }
}

fn counts_as_dependency_failure(error: &X402Error) -> bool {
    matches!(
        error,
        X402Error::Chain(_)
            | X402Error::Http(_)
            | X402Error::Json(_)
            | X402Error::DependencyUnavailable { .. }
    )
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn breaker() -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::default();
        let breaker =
            CircuitBreaker::with_clock(CircuitBreakerConfig::default(), Arc::new(clock.clone()));
        (breaker, clock)
    }

    #[test]
    fn test_opens_after_failure_threshold() {
        let (breaker, _clock) = breaker();

        for _ in 0..4 {
            breaker.record_failure("polygon");
            assert!(!breaker.is_open("polygon"));
        }
        breaker.record_failure("polygon");

        assert!(breaker.is_open("polygon"));
        assert_eq!(breaker.state("polygon"), CircuitState::Open);
        // Other dependencies are unaffected
        assert!(!breaker.is_open("ethereum"));
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let (breaker, _clock) = breaker();

        for _ in 0..4 {
            breaker.record_failure("polygon");
        }
        breaker.record_success("polygon");
        breaker.record_failure("polygon");

        assert!(!breaker.is_open("polygon"));
        assert_eq!(breaker.snapshot("polygon").failure_count, 1);
    }

    #[test]
    fn test_half_open_probe_is_handed_out_once() {
        let (breaker, clock) = breaker();
        for _ in 0..5 {
            breaker.record_failure("solana");
        }

        clock.advance(chrono::Duration::seconds(59));
        assert!(breaker.is_open("solana"));

        clock.advance(chrono::Duration::seconds(1));
        assert!(!breaker.is_open("solana"), "first caller gets the probe");
        assert_eq!(breaker.state("solana"), CircuitState::HalfOpen);
        assert!(breaker.is_open("solana"), "second caller fails fast");

        breaker.record_success("solana");
        assert!(!breaker.is_open("solana"), "next probe after success");
    }

    #[test]
    fn test_closes_after_success_threshold() {
        let (breaker, clock) = breaker();
        for _ in 0..5 {
            breaker.record_failure("arbitrum");
        }
        clock.advance(chrono::Duration::seconds(60));

        for _ in 0..3 {
            assert!(!breaker.is_open("arbitrum"));
            breaker.record_success("arbitrum");
        }

        let record = breaker.snapshot("arbitrum");
        assert_eq!(record.state, CircuitState::Closed);
        assert_eq!(record.failure_count, 0);
        assert_eq!(record.success_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (breaker, clock) = breaker();
        for _ in 0..5 {
            breaker.record_failure("ethereum");
        }
        clock.advance(chrono::Duration::seconds(60));

        assert!(!breaker.is_open("ethereum"));
        breaker.record_success("ethereum");
        assert!(!breaker.is_open("ethereum"));
        breaker.record_failure("ethereum");

        let record = breaker.snapshot("ethereum");
        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.success_count, 0);
        assert!(breaker.is_open("ethereum"));
    }

    #[test]
    fn test_dependency_override() {
        let clock = ManualClock::default();
        let breaker =
            CircuitBreaker::with_clock(CircuitBreakerConfig::default(), Arc::new(clock))
                .with_dependency_config(
                    "exchange_rates",
                    CircuitBreakerConfig {
                        failure_threshold: 1,
                        ..CircuitBreakerConfig::default()
                    },
                );

        breaker.record_failure("exchange_rates");
        assert!(breaker.is_open("exchange_rates"));
    }

    #[tokio::test]
    async fn test_call_fails_fast_when_open() {
        let (breaker, _clock) = breaker();
        for _ in 0..5 {
            breaker.record_failure("polygon");
        }

        let result: Result<u32> = breaker
            .call("polygon", None, async { panic!("must not be polled") })
            .await;
        assert!(matches!(
            result,
            Err(X402Error::DependencyUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_call_timeout_counts_as_failure() {
        let (breaker, _clock) = breaker();

        let result: Result<u32> = breaker
            .call("polygon", Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;

        assert!(matches!(
            result,
            Err(X402Error::DependencyUnavailable { .. })
        ));
        assert_eq!(breaker.snapshot("polygon").failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_is_released() {
        let (breaker, clock) = breaker();
        for _ in 0..5 {
            breaker.record_failure("polygon");
        }
        clock.advance(chrono::Duration::seconds(60));

        // The caller gives up on the probe before the dependency answers
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call("polygon", None, std::future::pending::<Result<u32>>()),
        )
        .await;
        assert!(abandoned.is_err());

        let record = breaker.snapshot("polygon");
        assert_eq!(record.state, CircuitState::HalfOpen);
        assert!(!record.probe_in_flight);

        let result = breaker.call("polygon", None, async { Ok(7u32) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.snapshot("polygon").success_count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_closed_call_is_not_a_failure() {
        let (breaker, _clock) = breaker();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            breaker.call("polygon", None, std::future::pending::<Result<u32>>()),
        )
        .await;
        assert!(abandoned.is_err());

        let record = breaker.snapshot("polygon");
        assert_eq!(record.state, CircuitState::Closed);
        assert_eq!(record.failure_count, 0);
    }

    #[tokio::test]
    async fn test_business_errors_do_not_trip_breaker() {
        let (breaker, _clock) = breaker();

        let result: Result<u32> = breaker
            .call("polygon", None, async {
                Err(X402Error::insufficient_funds("balance 1 < 2"))
            })
            .await;
        assert!(matches!(result, Err(X402Error::InsufficientFunds(_))));

        let result: Result<u32> = breaker
            .call("polygon", None, async { Err(X402Error::chain("node 502")) })
            .await;
        assert!(matches!(
            result,
            Err(X402Error::DependencyUnavailable { .. })
        ));
        assert_eq!(breaker.snapshot("polygon").failure_count, 1);
    }
}
