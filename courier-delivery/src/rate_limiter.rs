//! Admission rate limiting using a token bucket with windowed refill
//!
//! One bucket guards one `EmailService`. Every admission check consumes a
//! token; once the bucket is empty requests are rejected until the window
//! elapses, at which point the bucket is refilled to capacity in one step.
//!
//! # Example
//!
//! ```text
//! Rate limit: 3 requests per 1000 ms
//! t=0ms:    allow, allow, allow   (tokens 2, 1, 0)
//! t=10ms:   deny                  (tokens 0)
//! t=1000ms: allow                 (refilled to 3, tokens 2)
//! ```
//!
//! A denial is final for that call. Callers never wait on the limiter.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for admission rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity, the number of requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Refill period (milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

const fn default_max_requests() -> u32 {
    100
}

const fn default_window_ms() -> u64 {
    60_000
}

/// Token bucket state
#[derive(Debug)]
struct TokenBucket {
    /// Current number of tokens
    tokens: u32,
    /// Maximum tokens
    capacity: u32,
    /// Refill period
    window: Duration,
    /// Last time the bucket was refilled
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration) -> Self {
        Self {
            tokens: capacity,
            capacity,
            window,
            last_refill: Instant::now(),
        }
    }

    /// Refill to capacity if a full window has elapsed
    fn refill(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_refill) >= self.window {
            self.tokens = self.capacity;
            self.last_refill = now;
        }
    }

    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn time_until_refill(&mut self) -> Duration {
        self.refill();
        self.window
            .saturating_sub(Instant::now().duration_since(self.last_refill))
    }
}

/// Admission rate limiter shared by all callers of one service
#[derive(Debug)]
pub struct RateLimiter {
    bucket: parking_lot::Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Create a new rate limiter with a full bucket
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            bucket: parking_lot::Mutex::new(TokenBucket::new(
                config.max_requests,
                Duration::from_millis(config.window_ms),
            )),
        }
    }

    /// Try to admit one request
    ///
    /// Refill, check and decrement happen under one lock so concurrent
    /// callers can never be over-admitted.
    pub fn allow_request(&self) -> bool {
        let mut bucket = self.bucket.lock();
        let allowed = bucket.try_consume();

        if !allowed {
            let wait = bucket.time_until_refill();
            drop(bucket);
            debug!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Rate limit exceeded"
            );
        }

        allowed
    }

    /// Tokens left in the current window, without consuming one
    pub fn remaining_tokens(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        bucket.refill();
        bucket.tokens
    }

    /// Time until the bucket is refilled, without consuming a token
    pub fn time_until_refill(&self) -> Duration {
        self.bucket.lock().time_until_refill()
    }

    /// Snapshot for monitoring
    pub fn stats(&self) -> RateLimitStats {
        let mut bucket = self.bucket.lock();
        RateLimitStats {
            remaining_tokens: {
                bucket.refill();
                bucket.tokens
            },
            capacity: bucket.capacity,
            time_until_refill: bucket.time_until_refill(),
        }
    }
}

/// Statistics for the rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    /// Tokens left in the current window
    pub remaining_tokens: u32,
    /// Bucket capacity
    pub capacity: u32,
    /// Time until the next refill
    pub time_until_refill: Duration,
}
