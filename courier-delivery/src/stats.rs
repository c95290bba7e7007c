//! Per-service aggregate counters
//!
//! Every `EmailService` owns its own counters, so several services in one
//! process (or one test binary) never see each other's numbers.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::Serialize;

use crate::rate_limiter::RateLimitStats;

#[derive(Debug, Default)]
pub(crate) struct ServiceStats {
    total_requests: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    rate_limited: AtomicU64,
    cache_hits: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
    provider_failures: DashMap<String, u64, ahash::RandomState>,
}

impl ServiceStats {
    pub(crate) fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_provider_failure(&self, provider: &str) {
        *self
            .provider_failures
            .entry(provider.to_string())
            .or_insert(0) += 1;
    }

    pub(crate) fn snapshot(
        &self,
        rate_limit: RateLimitStats,
        cached_responses: usize,
    ) -> ServiceMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);

        ServiceMetrics {
            total_requests,
            successful,
            failed: self.failed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            provider_failures: self
                .provider_failures
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            success_rate: success_rate(successful, total_requests),
            rate_limit,
            cached_responses,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn success_rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64 * 100.0
    }
}

/// Aggregate counters for one service
///
/// Every dispatch round counts as a request: the initial send, and each retry
/// made by the queue sweep. Cache hits are counted separately.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub rate_limited: u64,
    pub cache_hits: u64,
    /// Requests placed on the retry queue
    pub queued: u64,
    /// Queued entries abandoned after their final attempt
    pub dropped: u64,
    /// Exhausted-provider failures, by provider name
    pub provider_failures: BTreeMap<String, u64>,
    /// Percentage of requests that were sent, 0 when there were none
    pub success_rate: f64,
    pub rate_limit: RateLimitStats,
    /// Results currently held in the idempotency cache
    pub cached_responses: usize,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn rate_limit() -> RateLimitStats {
        RateLimitStats {
            remaining_tokens: 10,
            capacity: 10,
            time_until_refill: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_success_rate_without_requests_is_zero() {
        let stats = ServiceStats::default();
        let snapshot = stats.snapshot(rate_limit(), 0);

        assert_eq!(snapshot.total_requests, 0);
        assert!(snapshot.success_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_and_success_rate() {
        let stats = ServiceStats::default();
        for _ in 0..4 {
            stats.record_request();
        }
        for _ in 0..3 {
            stats.record_success();
        }
        stats.record_failure();
        stats.record_provider_failure("primary");
        stats.record_provider_failure("primary");
        stats.record_provider_failure("backup");
        stats.record_cache_hit();

        let snapshot = stats.snapshot(rate_limit(), 2);
        assert_eq!(snapshot.successful, 3);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cached_responses, 2);
        assert!((snapshot.success_rate - 75.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.provider_failures.get("primary"), Some(&2));
        assert_eq!(snapshot.provider_failures.get("backup"), Some(&1));
    }
}
