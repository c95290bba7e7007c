//! Dispatch engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    circuit_breaker::CircuitBreakerConfig, error::ConfigError, queue::QueueConfig,
    rate_limiter::RateLimitConfig, retry::RetryConfig,
};

const fn default_enable_queue() -> bool {
    true
}

const fn default_queue_processing_interval_ms() -> u64 {
    30_000
}

const fn default_idempotency_ttl_secs() -> u64 {
    86_400 // 24 hours
}

const fn default_max_concurrent_retries() -> usize {
    4
}

/// Configuration for one `EmailService`
///
/// # Example
///
/// ```ron
/// service: (
///     retry: (max_attempts: 3, base_delay_ms: 1000),
///     rate_limit: (max_requests: 100, window_ms: 60000),
///     circuit_breaker: (failure_threshold: 5),
///     enable_queue: true,
///     queue: File(path: "/var/spool/courier/retry"),
/// )
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Per-provider retry behaviour, also used to reschedule queued entries
    #[serde(default)]
    pub retry: RetryConfig,

    /// Admission rate limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker settings applied to every provider
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Queue requests that exhaust every provider for a later retry
    ///
    /// Default: `true`
    #[serde(default = "default_enable_queue")]
    pub enable_queue: bool,

    /// How often the queue is swept for due entries (milliseconds)
    ///
    /// Default: 30000 (30 seconds)
    #[serde(default = "default_queue_processing_interval_ms")]
    pub queue_processing_interval_ms: u64,

    /// How long a result stays cached under its idempotency key (seconds)
    ///
    /// Default: 86400 (24 hours)
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,

    /// Queued entries retried in parallel during one sweep
    ///
    /// Default: 4
    #[serde(default = "default_max_concurrent_retries")]
    pub max_concurrent_retries: usize,

    /// Retry queue backend
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            enable_queue: default_enable_queue(),
            queue_processing_interval_ms: default_queue_processing_interval_ms(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            max_concurrent_retries: default_max_concurrent_retries(),
            queue: QueueConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Reject values the engine cannot work with
    ///
    /// # Errors
    /// The first invalid field found
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (
                self.retry.max_attempts == 0,
                "retry.max_attempts",
                "must be at least 1",
            ),
            (
                self.retry.base_delay_ms == 0,
                "retry.base_delay_ms",
                "must be greater than zero",
            ),
            (
                self.retry.max_delay_ms < self.retry.base_delay_ms,
                "retry.max_delay_ms",
                "must not be below retry.base_delay_ms",
            ),
            (
                !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0,
                "retry.backoff_multiplier",
                "must be a finite number of at least 1.0",
            ),
            (
                self.rate_limit.max_requests == 0,
                "rate_limit.max_requests",
                "must be at least 1",
            ),
            (
                self.rate_limit.window_ms == 0,
                "rate_limit.window_ms",
                "must be greater than zero",
            ),
            (
                self.circuit_breaker.failure_threshold == 0,
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ),
            (
                self.enable_queue && self.queue_processing_interval_ms == 0,
                "queue_processing_interval_ms",
                "must be greater than zero",
            ),
            (
                self.max_concurrent_retries == 0,
                "max_concurrent_retries",
                "must be at least 1",
            ),
        ];

        checks
            .into_iter()
            .find_map(|(invalid, field, reason)| {
                invalid.then_some(ConfigError::InvalidValue { field, reason })
            })
            .map_or(Ok(()), Err)
    }

    /// Sweep interval as a `Duration`
    #[must_use]
    pub const fn queue_processing_interval(&self) -> Duration {
        Duration::from_millis(self.queue_processing_interval_ms)
    }

    /// Idempotency TTL as a `Duration`
    #[must_use]
    pub const fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert!((config.retry.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout_ms, 60_000);
        assert_eq!(config.circuit_breaker.monitoring_period_ms, 300_000);
        assert!(config.enable_queue);
        assert_eq!(config.queue_processing_interval(), Duration::from_secs(30));
        assert_eq!(config.idempotency_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.queue, QueueConfig::Memory);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config: ServiceConfig = ron::from_str(
            "(retry: (max_attempts: 5), rate_limit: (window_ms: 1000), enable_queue: false)",
        )
        .expect("valid config");

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window_ms, 1000);
        assert!(!config.enable_queue);
        assert_eq!(config.max_concurrent_retries, 4);
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let mut config = ServiceConfig::default();
        config.retry.max_attempts = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                reason: "must be at least 1",
            })
        );

        let mut config = ServiceConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.rate_limit.window_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.enable_queue = false;
        config.queue_processing_interval_ms = 0;
        assert_eq!(config.validate(), Ok(()));
    }
}
