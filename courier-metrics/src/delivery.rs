//! Dispatch metrics
//!
//! Tracks outbound sends including:
//! - Send attempts by status and provider
//! - Sent / failed / queued / rate limited message counters
//! - Attempts needed before success
//! - Retry queue size

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

/// Dispatch metrics collector
#[derive(Debug)]
pub struct DeliveryMetrics {
    /// Total number of provider attempts by status and provider
    attempts_total: Counter<u64>,

    /// Total number of messages sent successfully
    messages_sent: Counter<u64>,

    /// Total number of messages that failed every provider
    messages_failed: Counter<u64>,

    /// Total number of messages placed on the retry queue
    messages_queued: Counter<u64>,

    /// Total number of requests rejected by the rate limiter
    rate_limited: Counter<u64>,

    /// Total number of providers skipped because their circuit was open
    providers_skipped: Counter<u64>,

    /// Distribution of attempts needed before success
    attempts_before_success: Histogram<u64>,

    /// Current retry queue size (shared with the observable gauge callback)
    queue_size: Arc<AtomicU64>,
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryMetrics {
    /// Create a new collector from the global meter provider
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        let attempts_total = meter
            .u64_counter("courier.delivery.attempts.total")
            .with_description("Total number of provider attempts by status")
            .build();

        let messages_sent = meter
            .u64_counter("courier.delivery.messages.sent.total")
            .with_description("Total number of messages sent successfully")
            .build();

        let messages_failed = meter
            .u64_counter("courier.delivery.messages.failed.total")
            .with_description("Total number of messages that failed every provider")
            .build();

        let messages_queued = meter
            .u64_counter("courier.delivery.messages.queued.total")
            .with_description("Total number of messages placed on the retry queue")
            .build();

        let rate_limited = meter
            .u64_counter("courier.delivery.rate_limited.total")
            .with_description("Total number of requests rejected by the rate limiter")
            .build();

        let providers_skipped = meter
            .u64_counter("courier.delivery.providers.skipped.total")
            .with_description("Total number of providers skipped due to an open circuit")
            .build();

        let attempts_before_success = meter
            .u64_histogram("courier.delivery.attempts.before_success")
            .with_description("Distribution of attempts needed before success")
            .build();

        let queue_size = Arc::new(AtomicU64::new(0));
        let observed = queue_size.clone();

        // The meter keeps the callback alive internally
        meter
            .u64_observable_gauge("courier.delivery.queue.size")
            .with_description("Current retry queue size")
            .with_callback(move |observer| {
                observer.observe(observed.load(Ordering::Relaxed), &[]);
            })
            .build();

        Self {
            attempts_total,
            messages_sent,
            messages_failed,
            messages_queued,
            rate_limited,
            providers_skipped,
            attempts_before_success,
            queue_size,
        }
    }

    /// Record a single provider attempt
    pub fn record_attempt(&self, status: &str, provider: &str) {
        let attributes = [
            KeyValue::new("status", status.to_string()),
            KeyValue::new("provider", provider.to_string()),
        ];
        self.attempts_total.add(1, &attributes);
    }

    /// Record a successful send
    pub fn record_sent(&self, provider: &str, attempts: u32) {
        self.messages_sent
            .add(1, &[KeyValue::new("provider", provider.to_string())]);
        self.attempts_before_success.record(u64::from(attempts), &[]);
        self.record_attempt("success", provider);
    }

    /// Record a provider failure (after its retries were exhausted)
    pub fn record_provider_failure(&self, provider: &str) {
        self.record_attempt("failed", provider);
    }

    /// Record a request that failed every provider
    pub fn record_failed(&self, category: &str) {
        self.messages_failed
            .add(1, &[KeyValue::new("category", category.to_string())]);
    }

    /// Record a request placed on the retry queue
    pub fn record_queued(&self) {
        self.messages_queued.add(1, &[]);
    }

    /// Record a request rejected by the rate limiter
    pub fn record_rate_limited(&self) {
        self.rate_limited.add(1, &[]);
    }

    /// Record a provider skipped because its circuit is open
    pub fn record_provider_skipped(&self, provider: &str) {
        self.providers_skipped
            .add(1, &[KeyValue::new("provider", provider.to_string())]);
    }

    /// Set the absolute retry queue size
    pub fn set_queue_size(&self, size: u64) {
        self.queue_size.store(size, Ordering::Relaxed);
    }

    /// Current retry queue size as last reported
    #[must_use]
    pub fn queue_size(&self) -> u64 {
        self.queue_size.load(Ordering::Relaxed)
    }
}

/// Get the OpenTelemetry meter for dispatch metrics
fn meter() -> Meter {
    opentelemetry::global::meter("courier.delivery")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = DeliveryMetrics::new();

        metrics.record_attempt("success", "primary");
        metrics.record_sent("primary", 2);
        metrics.record_provider_failure("backup");
        metrics.record_failed("NETWORK");
        metrics.record_queued();
        metrics.record_rate_limited();
        metrics.record_provider_skipped("backup");
    }

    #[test]
    fn test_queue_size_gauge_value() {
        let metrics = DeliveryMetrics::new();
        assert_eq!(metrics.queue_size(), 0);

        metrics.set_queue_size(7);
        assert_eq!(metrics.queue_size(), 7);

        metrics.set_queue_size(2);
        assert_eq!(metrics.queue_size(), 2);
    }
}
