//! Per-provider circuit breaker to stop hammering a failing provider
//!
//! Every provider gets its own breaker. Breakers never share state.
//!
//! # Circuit Breaker Pattern
//!
//! The circuit breaker has three states:
//! - **Closed**: Normal operation, all sends allowed
//! - **Open**: Circuit tripped due to failures, the provider is skipped
//! - **Half-Open**: Recovery timeout elapsed, probe sends are allowed through
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  failure_threshold consecutive failures  ┌──────┐
//! │ Closed  │ ───────────────────────────────────────> │ Open │
//! └─────────┘                                          └──────┘
//!     ^                                                   │
//!     │                                                   │ recovery timeout elapsed
//!     │                                                   v
//!     │  3 successes          ┌───────────────┐
//!     └───────────────────────│  Half-Open    │
//!                             └───────────────┘
//!                                     │
//!                                     │ any failure
//!                                     v
//!                                 ┌──────┐
//!                                 │ Open │
//!                                 └──────┘
//! ```
//!
//! # Example
//!
//! ```text
//! Threshold: 5 consecutive failures
//! Recovery timeout: 60 seconds
//!
//! t=0s:   Closed (normal)
//! t=10s:  5th failure → Open
//! t=10s-70s: provider skipped
//! t=70s:  Half-Open (probes allowed)
//! t=71s:  3rd probe success → Closed
//! ```

use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Consecutive half-open successes required before the circuit closes
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 3;

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before probing (milliseconds)
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,

    /// Observation period reported alongside breaker stats (milliseconds)
    #[serde(default = "default_monitoring_period_ms")]
    pub monitoring_period_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            monitoring_period_ms: default_monitoring_period_ms(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout_ms() -> u64 {
    60_000
}

const fn default_monitoring_period_ms() -> u64 {
    300_000
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all sends allowed
    Closed,
    /// Circuit tripped - provider skipped
    Open,
    /// Testing recovery - probe sends allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug)]
struct CircuitBreakerData {
    state: CircuitState,
    /// Consecutive failures
    failure_count: u32,
    /// Monotonic time of the last failure, drives the recovery timeout
    last_failure: Option<Instant>,
    /// Wall clock time of the last failure, for reporting
    last_failure_at: Option<SystemTime>,
    /// Successes recorded while half-open
    half_open_successes: u32,
}

impl CircuitBreakerData {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            last_failure_at: None,
            half_open_successes: 0,
        }
    }

    fn is_recovery_elapsed(&self, recovery_timeout: Duration) -> bool {
        self.last_failure
            .is_none_or(|at| Instant::now().duration_since(at) >= recovery_timeout)
    }
}

/// Circuit breaker guarding a single provider
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    monitoring_period: Duration,
    data: parking_lot::Mutex<CircuitBreakerData>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker for a provider
    #[must_use]
    pub fn new(provider: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::from_millis(config.recovery_timeout_ms),
            monitoring_period: Duration::from_millis(config.monitoring_period_ms),
            data: parking_lot::Mutex::new(CircuitBreakerData::new()),
        }
    }

    /// Check whether a send may go to this provider
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// here and lets the call through.
    pub fn can_execute(&self) -> bool {
        let mut data = self.data.lock();
        match data.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if data.is_recovery_elapsed(self.recovery_timeout) {
                    data.state = CircuitState::HalfOpen;
                    data.half_open_successes = 0;
                    drop(data);
                    info!(
                        provider = %self.provider,
                        "Circuit breaker entering HALF-OPEN state - testing recovery"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful send
    ///
    /// Returns `true` if the circuit transitioned to Closed
    pub fn record_success(&self) -> bool {
        let mut data = self.data.lock();
        data.failure_count = 0;

        match data.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                data.half_open_successes += 1;
                if data.half_open_successes >= HALF_OPEN_SUCCESS_THRESHOLD {
                    data.state = CircuitState::Closed;
                    data.half_open_successes = 0;
                    drop(data);
                    info!(
                        provider = %self.provider,
                        "Circuit breaker CLOSED - normal operation resumed"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => {
                drop(data);
                warn!(
                    provider = %self.provider,
                    "Unexpected success while circuit is open"
                );
                false
            }
        }
    }

    /// Record a failed send
    ///
    /// Returns `true` if the circuit transitioned to Open
    pub fn record_failure(&self) -> bool {
        let mut data = self.data.lock();
        data.failure_count = data.failure_count.saturating_add(1);
        data.last_failure = Some(Instant::now());
        data.last_failure_at = Some(SystemTime::now());

        match data.state {
            CircuitState::HalfOpen => {
                data.state = CircuitState::Open;
                data.half_open_successes = 0;
                drop(data);
                warn!(
                    provider = %self.provider,
                    "Circuit breaker probe failed - reopening circuit"
                );
                true
            }
            CircuitState::Closed if data.failure_count >= self.failure_threshold => {
                data.state = CircuitState::Open;
                let failure_count = data.failure_count;
                drop(data);
                warn!(
                    provider = %self.provider,
                    failure_count,
                    threshold = self.failure_threshold,
                    recovery_timeout_ms = u64::try_from(self.recovery_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Circuit breaker OPENED - skipping provider"
                );
                true
            }
            CircuitState::Closed | CircuitState::Open => false,
        }
    }

    /// Current circuit state
    pub fn state(&self) -> CircuitState {
        self.data.lock().state
    }

    /// Provider this breaker guards
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Statistics for monitoring
    pub fn stats(&self) -> CircuitBreakerStats {
        let data = self.data.lock();
        CircuitBreakerStats {
            state: data.state,
            failure_count: data.failure_count,
            last_failure_at: data.last_failure_at,
            half_open_successes: data.half_open_successes,
            monitoring_period: self.monitoring_period,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// Current circuit state
    pub state: CircuitState,
    /// Consecutive failures
    pub failure_count: u32,
    /// Wall clock time of the last failure
    pub last_failure_at: Option<SystemTime>,
    /// Successes recorded while half-open
    pub half_open_successes: u32,
    /// Configured observation period
    pub monitoring_period: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, recovery_timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "primary",
            &CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout_ms,
                monitoring_period_ms: 300_000,
            },
        )
    }

    #[test]
    fn test_circuit_breaker_opens_exactly_at_threshold() {
        for threshold in 1..=6 {
            let breaker = breaker(threshold, 60_000);

            for _ in 1..threshold {
                assert!(!breaker.record_failure());
                assert_eq!(breaker.state(), CircuitState::Closed);
                assert!(breaker.can_execute());
            }

            assert!(breaker.record_failure());
            assert_eq!(breaker.state(), CircuitState::Open);
            assert!(!breaker.can_execute());
        }
    }

    #[test]
    fn test_circuit_breaker_success_resets_failures() {
        let breaker = breaker(3, 60_000);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 2);
    }

    #[test]
    fn test_open_circuit_rejects_until_recovery_timeout() {
        let breaker = breaker(1, 60_000);
        breaker.record_failure();

        for _ in 0..5 {
            assert!(!breaker.can_execute());
            assert_eq!(breaker.state(), CircuitState::Open);
        }
    }

    #[test]
    fn test_open_circuit_moves_to_half_open_after_timeout() {
        let breaker = breaker(2, 0);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Probes keep flowing while half-open
        assert!(breaker.can_execute());
    }

    #[test]
    #[cfg_attr(miri, ignore = "Time-based test not compatible with Miri")]
    fn test_recovery_timeout_measured_from_last_failure() {
        let breaker = breaker(1, 40);
        breaker.record_failure();
        assert!(!breaker.can_execute());

        std::thread::sleep(Duration::from_millis(50));

        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_requires_three_successes() {
        let breaker = breaker(1, 0);
        breaker.record_failure();
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(!breaker.record_success());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.record_success());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.stats().half_open_successes, 2);

        assert!(breaker.record_success());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().half_open_successes, 0);
    }

    #[test]
    fn test_half_open_failure_reopens_immediately() {
        let breaker = breaker(3, 0);
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.can_execute());

        breaker.record_success();
        breaker.record_success();
        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);

        // Partial credit is discarded
        assert!(breaker.can_execute());
        assert_eq!(breaker.stats().half_open_successes, 0);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_circuit_breaker_stats() {
        let breaker = breaker(5, 60_000);

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert!(stats.last_failure_at.is_none());
        assert_eq!(stats.monitoring_period, Duration::from_secs(300));

        breaker.record_failure();
        breaker.record_failure();

        let stats = breaker.stats();
        assert_eq!(stats.failure_count, 2);
        assert!(stats.last_failure_at.is_some());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
    }
}
