//! The provider fallback loop

use tracing::{info, trace, warn};

use super::EmailService;
use crate::{
    error::{AttemptError, DispatchError},
    provider::ProviderError,
    retry::Attempted,
    types::{SendRequest, SendResult},
};

/// Message used when no provider could be tried at all
const NO_PROVIDER_AVAILABLE: &str = "No provider available: circuit breaker open for every provider";

impl EmailService {
    /// Try each provider in priority order until one accepts `request`
    ///
    /// Within a provider, the retry manager gets several attempts before the
    /// provider is given up on. A provider whose circuit is open is skipped
    /// without being contacted. The reported attempt count is that of the
    /// provider that produced the outcome, never a sum across providers.
    pub(crate) async fn dispatch(
        &self,
        id: &str,
        request: &SendRequest,
    ) -> Result<SendResult, DispatchError> {
        let inner = &self.inner;
        let mut last_failure: Option<AttemptError<ProviderError>> = None;

        for slot in &inner.providers {
            let name = slot.provider.name();

            if !slot.breaker.can_execute() {
                warn!(
                    request_id = %id,
                    provider = %name,
                    "Circuit breaker open, skipping provider"
                );
                inner.metrics.record_provider_skipped(name);
                continue;
            }

            let outcome = inner
                .retry
                .execute_with_retry(|attempt| {
                    trace!(request_id = %id, provider = %name, attempt, "Attempting send");
                    slot.provider.send_email(request)
                })
                .await;

            match outcome {
                Ok(Attempted { value, attempts }) => {
                    slot.breaker.record_success();
                    inner.metrics.record_sent(name, attempts);
                    info!(
                        request_id = %id,
                        provider = %name,
                        attempts,
                        message_id = value.message_id.as_deref().unwrap_or("-"),
                        "Message sent"
                    );
                    return Ok(SendResult::sent(
                        id.to_string(),
                        name.to_string(),
                        value.message_id,
                        attempts,
                    ));
                }
                Err(failure) => {
                    slot.breaker.record_failure();
                    inner.stats.record_provider_failure(name);
                    inner.metrics.record_provider_failure(name);
                    warn!(
                        request_id = %id,
                        provider = %name,
                        attempts = failure.attempt,
                        error = %failure.error,
                        "Provider exhausted its attempts, falling back"
                    );
                    last_failure = Some(failure);
                }
            }
        }

        Err(last_failure.map_or_else(
            || DispatchError::AllProvidersFailed {
                attempts: 0,
                provider: None,
                message: NO_PROVIDER_AVAILABLE.to_string(),
                code: None,
            },
            |AttemptError { attempt, error }| DispatchError::AllProvidersFailed {
                attempts: attempt,
                provider: Some(error.provider),
                message: error.message,
                code: error.code,
            },
        ))
    }
}
