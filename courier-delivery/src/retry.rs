//! Retry logic with exponential backoff and additive jitter
//!
//! # Formula
//! `delay = min(base * multiplier^(attempt - 1) * (1 + jitter), max_delay)`
//! where `jitter` is drawn uniformly from `[0.1, 0.3]`.
//!
//! Jitter is added on top of the exponential delay rather than replacing part
//! of it, so the expected delay still grows with every attempt.

use std::{
    fmt::Display,
    future::Future,
    time::{Duration, SystemTime},
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::AttemptError, types::deadline_after};

/// Lower bound of the jitter fraction
const JITTER_MIN: f64 = 0.1;
/// Upper bound of the jitter fraction
const JITTER_MAX: f64 = 0.3;

/// Configuration for per-provider retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per provider, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

/// A successful value together with the attempt that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    /// The operation's output
    pub value: T,
    /// 1-based attempt number that succeeded
    pub attempts: u32,
}

/// Runs one operation with bounded attempts and backoff between them
///
/// The loop is strictly sequential. The only suspension point it adds is the
/// sleep between attempts.
#[derive(Debug, Clone)]
pub struct RetryManager {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    backoff_multiplier: f64,
}

impl RetryManager {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Attempts allowed per call
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Exponential delay for `attempt` before jitter and capping (milliseconds)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn exponential_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent)
    }

    /// Delay to wait after `attempt` failed
    ///
    /// `attempt` is 1-based. The result never exceeds the configured maximum.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponential = self.exponential_delay_ms(attempt);
        let jitter = exponential * rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
        let capped = (exponential + jitter).min(self.max_delay_ms as f64).max(0.0);

        Duration::try_from_secs_f64(capped / 1000.0)
            .unwrap_or_else(|_| Duration::from_millis(self.max_delay_ms))
    }

    /// When a queued entry that has failed `attempt` rounds may be retried
    #[must_use]
    pub fn next_retry_time(&self, attempt: u32) -> SystemTime {
        deadline_after(SystemTime::now(), self.compute_delay(attempt))
    }

    /// Run `operation` until it succeeds or the attempts run out
    ///
    /// The operation receives the 1-based attempt number. On exhaustion the
    /// last error is returned unmodified, annotated with its attempt number.
    ///
    /// # Errors
    /// Returns the final attempt's error if every attempt failed
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        mut operation: F,
    ) -> Result<Attempted<T>, AttemptError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) if attempt >= self.max_attempts => {
                    return Err(AttemptError { attempt, error });
                }
                Err(error) => {
                    let delay = self.compute_delay(attempt);
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
