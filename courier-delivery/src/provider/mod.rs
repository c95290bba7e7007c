//! Provider adapters
//!
//! A provider is anything that can attempt to deliver a [`SendRequest`] and
//! report a local health signal. The dispatcher tries providers in the order
//! they were registered; that order is the fallback priority.

mod log;
mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::{
    log::LogProvider,
    mock::{MockBehaviour, MockProvider},
};
use crate::types::SendRequest;

/// Proof of acceptance returned by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    /// Provider assigned message identifier
    pub message_id: Option<String>,
}

/// A single failed delivery attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    /// Provider that failed
    pub provider: String,
    /// Raw error text as reported by the provider
    pub message: String,
    /// Status code, when the provider reports one
    pub code: Option<String>,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            code: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Capability every provider adapter implements
#[async_trait]
pub trait EmailProvider: Send + Sync + std::fmt::Debug {
    /// Name used for logs, metrics and circuit breaker lookup
    fn name(&self) -> &str;

    /// Attempt to deliver `request`
    ///
    /// Timeouts are the adapter's responsibility; the dispatcher waits for as
    /// long as this future takes.
    async fn send_email(&self, request: &SendRequest) -> Result<ProviderReceipt, ProviderError>;

    /// Local, configuration based health signal
    ///
    /// Independent of circuit breaker state.
    async fn is_healthy(&self) -> bool;
}

/// Providers selectable from a configuration file
///
/// ```ron
/// providers: [
///     Log("primary"),
///     Failing("flaky", "503 Service Unavailable"),
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderConfig {
    /// Logs every message and accepts it
    Log(String),
    /// Rejects every message with the given error text
    Failing(String, String),
}

impl ProviderConfig {
    /// Construct the configured provider
    #[must_use]
    pub fn into_provider(self) -> Arc<dyn EmailProvider> {
        match self {
            Self::Log(name) => Arc::new(LogProvider::new(name)),
            Self::Failing(name, error) => Arc::new(MockProvider::always_failing(name, error)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provider_config_builds_named_providers() {
        let request = SendRequest::new("to@example.com", "from@example.com", "Hi", "Body");

        let log = ProviderConfig::Log("primary".to_string()).into_provider();
        assert_eq!(log.name(), "primary");
        assert!(log.send_email(&request).await.is_ok());

        let failing =
            ProviderConfig::Failing("flaky".to_string(), "503 Service Unavailable".to_string())
                .into_provider();
        assert_eq!(failing.name(), "flaky");
        let err = failing.send_email(&request).await.unwrap_err();
        assert_eq!(err.message, "503 Service Unavailable");
        assert_eq!(err.provider, "flaky");
    }

    #[test]
    fn test_provider_config_from_ron() {
        let providers: Vec<ProviderConfig> =
            ron::from_str(r#"[Log("primary"), Failing("backup", "timed out")]"#)
                .unwrap_or_default();

        assert_eq!(
            providers,
            vec![
                ProviderConfig::Log("primary".to_string()),
                ProviderConfig::Failing("backup".to_string(), "timed out".to_string()),
            ]
        );
    }

    #[test]
    fn test_provider_error_displays_raw_message() {
        let err = ProviderError::new("primary", "Error: 429 Too Many Requests").with_code("429");
        assert_eq!(err.to_string(), "Error: 429 Too Many Requests");
        assert_eq!(err.code.as_deref(), Some("429"));
    }
}
