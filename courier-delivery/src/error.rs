//! Typed error handling for dispatch operations.
//!
//! This module provides structured error types that distinguish between:
//! - Admission failures (rate limited) - terminal for the call
//! - Exhaustion (every provider and every retry failed) - may be queued
//! - Queue storage errors
//! - Configuration errors

use std::time::Duration;

use thiserror::Error;

use crate::types::SendResult;

/// Error raised by the dispatch path to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The rate limiter denied admission. Not retried by the engine itself.
    #[error("Rate limit exceeded, retry after {}ms", .retry_after.as_millis())]
    RateLimitExceeded {
        /// Time until the limiter refills
        retry_after: Duration,
    },

    /// Every provider, and every retry against each, failed.
    #[error("All providers failed: {message}")]
    AllProvidersFailed {
        /// Attempts made against the last provider tried
        attempts: u32,
        /// The last provider tried, if any was tried at all
        provider: Option<String>,
        /// Raw error message of the last failure
        message: String,
        /// Status code the last provider reported alongside its message
        code: Option<String>,
    },
}

impl DispatchError {
    /// Returns `true` if admission was denied by the rate limiter
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Returns `true` if every provider was exhausted
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::AllProvidersFailed { .. })
    }

    /// Raw error message, as recorded on the terminal `SendResult`
    #[must_use]
    pub fn raw_message(&self) -> String {
        match self {
            Self::RateLimitExceeded { .. } => self.to_string(),
            Self::AllProvidersFailed { message, .. } => message.clone(),
        }
    }

    /// Attempts made before this error was raised
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::RateLimitExceeded { .. } => 0,
            Self::AllProvidersFailed { attempts, .. } => *attempts,
        }
    }

    /// Provider that produced the failure, if any provider was tried
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::RateLimitExceeded { .. } => None,
            Self::AllProvidersFailed { provider, .. } => provider.as_deref(),
        }
    }

    /// Status code reported by that provider, if it gave one
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::RateLimitExceeded { .. } => None,
            Self::AllProvidersFailed { code, .. } => code.as_deref(),
        }
    }
}

/// Error returned by `EmailService::send_email`.
///
/// Carries the terminal result that was cached under the request's key, so
/// the caller sees the raw error, the attempt count and the classification
/// without re-deriving them.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{source}")]
pub struct SendError {
    /// What went wrong
    #[source]
    pub source: DispatchError,
    /// The terminal result, as cached
    pub result: Box<SendResult>,
}

impl SendError {
    /// Returns `true` if admission was denied by the rate limiter
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        self.source.is_rate_limited()
    }

    /// Returns `true` if every provider was exhausted
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.source.is_exhausted()
    }
}

/// The final error of a retry loop, annotated with the attempt that raised it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error} (attempt {attempt})")]
pub struct AttemptError<E> {
    /// 1-based attempt number that produced `error`
    pub attempt: u32,
    /// The original error, unmodified
    pub error: E,
}

impl<E> AttemptError<E> {
    /// Discard the annotation and return the original error
    pub fn into_inner(self) -> E {
        self.error
    }
}

/// Retry queue storage errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Filesystem error in a file-backed queue
    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode or decode a queued message
    #[error("Queue serialization error: {0}")]
    Serialization(String),

    /// No entry with the given id
    #[error("Queued message not found: {0}")]
    NotFound(String),

    /// Any other backend failure
    #[error("Queue error: {0}")]
    Internal(String),
}

impl From<bincode::error::EncodeError> for QueueError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for QueueError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Invalid service configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value the engine cannot work with
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the offending field
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },

    /// The service was built without any provider
    #[error("At least one provider must be configured")]
    NoProviders,

    /// The configured retry queue backend could not be opened
    #[error("Failed to open retry queue: {0}")]
    Queue(String),
}
