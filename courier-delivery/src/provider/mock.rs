//! Scriptable provider for tests and local runs

use std::{
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;

use super::{EmailProvider, ProviderError, ProviderReceipt};
use crate::types::SendRequest;

/// How a [`MockProvider`] answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehaviour {
    /// Accept every message
    Succeed,
    /// Fail the first `n` calls with `error`, then accept
    FailTimes(u32, String),
    /// Fail every call with the given error
    AlwaysFail(String),
}

/// A provider whose answers are scripted up front
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    behaviour: parking_lot::Mutex<MockBehaviour>,
    latency: Option<Duration>,
    error_code: Option<String>,
    calls: AtomicU32,
    healthy: AtomicBool,
    sent: parking_lot::Mutex<Vec<SendRequest>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour: parking_lot::Mutex::new(behaviour),
            latency: None,
            error_code: None,
            calls: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            sent: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// A provider that accepts everything
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::Succeed)
    }

    /// A provider that rejects everything with `error`
    pub fn always_failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::AlwaysFail(error.into()))
    }

    /// A provider that rejects the first `times` calls with `error`
    pub fn failing_times(name: impl Into<String>, times: u32, error: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::FailTimes(times, error.into()))
    }

    /// Delay every call by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Report `code` alongside every failure
    #[must_use]
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Replace the script, keeping the call count
    pub fn set_behaviour(&self, behaviour: MockBehaviour) {
        *self.behaviour.lock() = behaviour;
    }

    /// Change the reported health signal
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of `send_email` calls so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests accepted so far
    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EmailProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_email(&self, request: &SendRequest) -> Result<ProviderReceipt, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failure = match &*self.behaviour.lock() {
            MockBehaviour::Succeed => None,
            MockBehaviour::FailTimes(times, error) => (call <= *times).then(|| error.clone()),
            MockBehaviour::AlwaysFail(error) => Some(error.clone()),
        };

        if let Some(error) = failure {
            let error = ProviderError::new(&self.name, error);
            return Err(match &self.error_code {
                Some(code) => error.with_code(code.clone()),
                None => error,
            });
        }

        self.sent.lock().push(request.clone());

        Ok(ProviderReceipt {
            message_id: Some(format!("{}-{call}", self.name)),
        })
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SendRequest {
        SendRequest::new("to@example.com", "from@example.com", "Hi", "Body")
    }

    #[tokio::test]
    async fn test_fail_times_then_succeed() {
        let provider = MockProvider::failing_times("primary", 2, "timed out");

        assert!(provider.send_email(&request()).await.is_err());
        assert!(provider.send_email(&request()).await.is_err());

        let receipt = provider.send_email(&request()).await;
        assert_eq!(
            receipt,
            Ok(ProviderReceipt {
                message_id: Some("primary-3".to_string())
            })
        );
        assert_eq!(provider.calls(), 3);
        assert_eq!(provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_behaviour_and_health_can_change() {
        let provider = MockProvider::always_failing("primary", "503");
        assert!(provider.send_email(&request()).await.is_err());

        provider.set_behaviour(MockBehaviour::Succeed);
        assert!(provider.send_email(&request()).await.is_ok());

        assert!(provider.is_healthy().await);
        provider.set_healthy(false);
        assert!(!provider.is_healthy().await);
    }
}
