//! Resilient outbound email dispatch
//!
//! This crate provides functionality to:
//! - Admit requests through a token bucket rate limiter
//! - Deliver through an ordered list of providers with per-provider retries
//! - Stop calling failing providers with per-provider circuit breakers
//! - Answer repeated submissions from an idempotency cache
//! - Queue requests that exhausted every provider and retry them on a timer
//! - Classify free-text provider errors

pub mod circuit_breaker;
mod config;
mod error;
pub mod idempotency;
pub mod normalizer;
mod processor;
pub mod provider;
pub mod queue;
pub mod rate_limiter;
pub mod retry;
mod service;
mod stats;
mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use config::ServiceConfig;
pub use error::{AttemptError, ConfigError, DispatchError, QueueError, SendError};
pub use idempotency::{IdempotencyCache, derive_key};
pub use normalizer::{ErrorCategory, ErrorNormalizer, ErrorSeverity, NormalizedError};
pub use processor::{EmailService, EmailServiceBuilder, SweepReport};
pub use provider::{
    EmailProvider, LogProvider, MockBehaviour, MockProvider, ProviderConfig, ProviderError,
    ProviderReceipt,
};
pub use queue::{FileQueue, MemoryQueue, QueueConfig, RetryQueue};
pub use rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use retry::{Attempted, RetryConfig, RetryManager};
pub use service::{EmailStatusService, ProviderStatus, QueueStatus};
pub use stats::ServiceMetrics;
pub use types::{QueuedMessage, SendRequest, SendResult, SendStatus};
