//! Shared fixtures for the dispatch engine tests

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use courier_delivery::{EmailProvider, EmailService, MockProvider, SendRequest, ServiceConfig};

/// A configuration with millisecond backoff so tests do not sleep for long
pub fn fast_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.circuit_breaker.failure_threshold = 100;
    config.queue_processing_interval_ms = 20;
    config
}

/// A distinct request per `n`
pub fn request(n: usize) -> SendRequest {
    SendRequest::new(
        format!("user{n}@example.com"),
        "noreply@example.com",
        format!("Message {n}"),
        "Hello there",
    )
}

/// Build a service over `providers`, keeping them in the given order
pub fn service(config: ServiceConfig, providers: &[&Arc<MockProvider>]) -> EmailService {
    EmailService::builder(config)
        .providers(
            providers
                .iter()
                .map(|provider| Arc::clone(provider) as Arc<dyn EmailProvider>),
        )
        .build()
        .expect("valid service configuration")
}

/// Sleep long enough for every entry queued under [`fast_config`] to be due
pub async fn wait_until_due() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

pub fn succeeding(name: &str) -> Arc<MockProvider> {
    Arc::new(MockProvider::succeeding(name))
}

pub fn failing(name: &str, error: &str) -> Arc<MockProvider> {
    Arc::new(MockProvider::always_failing(name, error))
}
