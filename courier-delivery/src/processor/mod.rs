//! Dispatch coordination
//!
//! [`EmailService`] owns everything one dispatch engine needs: the rate
//! limiter, one circuit breaker per provider, the retry manager, the
//! idempotency cache and the retry queue. Nothing is shared between
//! services.
//!
//! ```text
//! request ──> idempotency cache ──hit──> cached result
//!                    │ miss
//!                    v
//!              rate limiter ──deny──> RateLimitExceeded (cached)
//!                    │
//!                    v
//!   for each provider in priority order:
//!       circuit open? ──> skip
//!       RetryManager(send) ──ok──> Sent (cached)
//!                          ──err─> record failure, next provider
//!                    │ all failed
//!                    v
//!   normalize ──> Queued / Failed (cached) ──> retry queue
//! ```

mod dispatch;
mod sweep;

use std::{sync::Arc, time::SystemTime};

use async_trait::async_trait;
use courier_common::{Signal, internal};
use courier_metrics::DeliveryMetrics;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, warn};

pub use self::sweep::SweepReport;
use crate::{
    circuit_breaker::CircuitBreaker,
    config::ServiceConfig,
    error::{ConfigError, DispatchError, SendError},
    idempotency::{IdempotencyCache, derive_key},
    normalizer::ErrorNormalizer,
    provider::EmailProvider,
    queue::RetryQueue,
    rate_limiter::RateLimiter,
    retry::RetryManager,
    service::{EmailStatusService, ProviderStatus, QueueStatus},
    stats::{ServiceMetrics, ServiceStats},
    types::{QueuedMessage, SendRequest, SendResult, SendStatus},
};

/// A provider together with the breaker that guards it
#[derive(Debug)]
pub(crate) struct ProviderSlot {
    pub(crate) provider: Arc<dyn EmailProvider>,
    pub(crate) breaker: CircuitBreaker,
}

/// Running sweep task and the channel that stops it
#[derive(Debug)]
struct Sweeper {
    shutdown: broadcast::Sender<Signal>,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) config: ServiceConfig,
    pub(crate) providers: Vec<ProviderSlot>,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) retry: RetryManager,
    pub(crate) cache: IdempotencyCache,
    pub(crate) queue: Arc<dyn RetryQueue>,
    pub(crate) stats: ServiceStats,
    pub(crate) metrics: Arc<DeliveryMetrics>,
    pub(crate) sweeping: std::sync::atomic::AtomicBool,
    sweeper: parking_lot::Mutex<Option<Sweeper>>,
}

/// The dispatch engine
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone)]
pub struct EmailService {
    pub(crate) inner: Arc<Inner>,
}

/// Builder for [`EmailService`]
#[derive(Debug)]
pub struct EmailServiceBuilder {
    config: ServiceConfig,
    providers: Vec<Arc<dyn EmailProvider>>,
    queue: Option<Arc<dyn RetryQueue>>,
    metrics: Option<Arc<DeliveryMetrics>>,
}

impl EmailServiceBuilder {
    /// Append a provider. Registration order is the fallback priority.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn EmailProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Append several providers, keeping their order
    #[must_use]
    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn EmailProvider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Use this queue instead of the one named in the configuration
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn RetryQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Record into these instruments instead of a fresh set
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<DeliveryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and assemble the service
    ///
    /// # Errors
    /// - If the configuration is invalid
    /// - If no provider was registered
    /// - If the configured queue backend cannot be opened
    pub fn build(self) -> Result<EmailService, ConfigError> {
        self.config.validate()?;

        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let queue = match self.queue {
            Some(queue) => queue,
            None => self
                .config
                .queue
                .clone()
                .into_queue()
                .map_err(|e| ConfigError::Queue(e.to_string()))?,
        };

        let providers = self
            .providers
            .into_iter()
            .map(|provider| ProviderSlot {
                breaker: CircuitBreaker::new(provider.name(), &self.config.circuit_breaker),
                provider,
            })
            .collect::<Vec<_>>();

        internal!(
            level = DEBUG,
            "Email service built with {} provider(s), queue {}",
            providers.len(),
            if self.config.enable_queue { "enabled" } else { "disabled" }
        );

        Ok(EmailService {
            inner: Arc::new(Inner {
                rate_limiter: RateLimiter::new(&self.config.rate_limit),
                retry: RetryManager::new(&self.config.retry),
                cache: IdempotencyCache::new(self.config.idempotency_ttl()),
                queue,
                providers,
                stats: ServiceStats::default(),
                metrics: self.metrics.unwrap_or_default(),
                sweeping: std::sync::atomic::AtomicBool::new(false),
                sweeper: parking_lot::Mutex::new(None),
                config: self.config,
            }),
        })
    }
}

impl EmailService {
    /// Start building a service from `config`
    #[must_use]
    pub fn builder(config: ServiceConfig) -> EmailServiceBuilder {
        EmailServiceBuilder {
            config,
            providers: Vec::new(),
            queue: None,
            metrics: None,
        }
    }

    /// Send `request`, at most once per idempotency key
    ///
    /// Without a key one is derived from the request content and a coarse
    /// timestamp. A key that already has a cached result returns that result
    /// without any side effect, whatever its status.
    ///
    /// # Errors
    /// - [`DispatchError::RateLimitExceeded`] if admission was denied
    /// - [`DispatchError::AllProvidersFailed`] if every provider failed; the
    ///   request has then been queued for a later retry when queueing is on
    pub async fn send_email(
        &self,
        request: SendRequest,
        idempotency_key: Option<String>,
    ) -> Result<SendResult, SendError> {
        let inner = &self.inner;
        let id = idempotency_key.unwrap_or_else(|| derive_key(&request, SystemTime::now()));

        if let Some(cached) = inner.cache.get_response(&id) {
            debug!(request_id = %id, status = %cached.status, "Returning cached result");
            inner.stats.record_cache_hit();
            return Ok(cached);
        }

        inner.stats.record_request();

        if !inner.rate_limiter.allow_request() {
            let source = DispatchError::RateLimitExceeded {
                retry_after: inner.rate_limiter.time_until_refill(),
            };
            inner.stats.record_rate_limited();
            inner.stats.record_failure();
            inner.metrics.record_rate_limited();
            return Err(self.fail(id, source, SendStatus::Failed));
        }

        match self.dispatch(&id, &request).await {
            Ok(result) => {
                inner.stats.record_success();
                inner.cache.store_response(&id, result.clone());
                Ok(result)
            }
            Err(source) => {
                inner.stats.record_failure();
                let status = if inner.config.enable_queue && self.enqueue(&id, request, &source).await
                {
                    SendStatus::Queued
                } else {
                    SendStatus::Failed
                };
                Err(self.fail(id, source, status))
            }
        }
    }

    /// Build, cache and wrap the terminal result for a failed send
    fn fail(&self, id: String, source: DispatchError, status: SendStatus) -> SendError {
        let message = source.raw_message();
        let normalized = ErrorNormalizer::normalize(&message, source.provider(), source.code());
        self.inner
            .metrics
            .record_failed(&normalized.category.to_string());

        let result = SendResult::failure(id, status, source.attempts(), message, normalized);
        self.inner.cache.store_response(&result.id, result.clone());

        SendError {
            source,
            result: Box::new(result),
        }
    }

    /// Place a request that exhausted every provider on the retry queue
    ///
    /// Returns `false` if the queue rejected it.
    async fn enqueue(&self, id: &str, request: SendRequest, source: &DispatchError) -> bool {
        let inner = &self.inner;
        let message = QueuedMessage::new(
            id.to_string(),
            request,
            inner.retry.compute_delay(1),
            source.raw_message(),
        );

        match inner.queue.push(message).await {
            Ok(()) => {
                inner.stats.record_queued();
                inner.metrics.record_queued();
                self.refresh_queue_size().await;
                debug!(request_id = %id, "Request queued for retry");
                true
            }
            Err(e) => {
                error!(request_id = %id, error = %e, "Failed to queue request for retry");
                false
            }
        }
    }

    pub(crate) async fn refresh_queue_size(&self) {
        match self.inner.queue.size().await {
            Ok(size) => self
                .inner
                .metrics
                .set_queue_size(u64::try_from(size).unwrap_or(u64::MAX)),
            Err(e) => warn!(error = %e, "Failed to read retry queue size"),
        }
    }

    /// Start the periodic queue sweep
    ///
    /// Returns `false` without doing anything if queueing is disabled, the
    /// sweep is already running, or there is no tokio runtime to run it on.
    pub fn start_queue_processing(&self) -> bool {
        if !self.inner.config.enable_queue {
            debug!("Queue disabled, not starting queue processing");
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, queue processing not started");
            return false;
        };

        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.is_some() {
            return false;
        }

        let (shutdown, receiver) = broadcast::channel(1);
        let handle = runtime.spawn(sweep::serve(
            Arc::downgrade(&self.inner),
            self.inner.config.queue_processing_interval(),
            receiver,
        ));
        *sweeper = Some(Sweeper { shutdown, handle });
        drop(sweeper);

        internal!(
            level = INFO,
            "Queue processing started, interval {}ms",
            self.inner.config.queue_processing_interval_ms
        );
        true
    }

    /// Returns `true` while the periodic sweep is running
    #[must_use]
    pub fn is_processing_queue(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .as_ref()
            .is_some_and(|sweeper| !sweeper.handle.is_finished())
    }

    /// Stop the periodic queue sweep
    ///
    /// Only the timer stops: queued entries stay where they are. Safe to call
    /// when processing was never started, and safe to call twice. Waits for
    /// a sweep that is already in progress to finish.
    pub async fn shutdown(&self) {
        let Some(Sweeper { shutdown, handle }) = self.inner.sweeper.lock().take() else {
            return;
        };

        // The task may already be gone, in which case there is nobody to tell
        let _ = shutdown.send(Signal::Shutdown);

        if let Err(e) = handle.await {
            error!(error = %e, "Queue processing task failed");
        }

        internal!(level = INFO, "Queue processing stopped");
    }

    /// Configuration this service was built with
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// The circuit breaker guarding `provider`, if such a provider exists
    #[must_use]
    pub fn circuit_breaker(&self, provider: &str) -> Option<&CircuitBreaker> {
        self.inner
            .providers
            .iter()
            .find(|slot| slot.provider.name() == provider)
            .map(|slot| &slot.breaker)
    }

    /// The admission rate limiter
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    /// The idempotency cache
    #[must_use]
    pub fn cache(&self) -> &IdempotencyCache {
        &self.inner.cache
    }

    /// The retry queue
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn RetryQueue> {
        &self.inner.queue
    }

    /// Every provider in priority order, with its health and breaker state
    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let mut status = Vec::with_capacity(self.inner.providers.len());
        for slot in &self.inner.providers {
            let circuit = slot.breaker.stats();
            status.push(ProviderStatus {
                name: slot.provider.name().to_string(),
                healthy: slot.provider.is_healthy().await,
                circuit_state: circuit.state,
                circuit,
            });
        }
        status
    }

    /// Current retry queue contents
    ///
    /// # Errors
    /// If the queue backend cannot be read
    pub async fn queue_status(&self) -> Result<QueueStatus, crate::error::QueueError> {
        let items = self.inner.queue.get_all().await?;
        Ok(QueueStatus {
            length: items.len(),
            items,
        })
    }

    /// Aggregate counters
    #[must_use]
    pub fn metrics(&self) -> ServiceMetrics {
        self.inner
            .stats
            .snapshot(self.inner.rate_limiter.stats(), self.inner.cache.len())
    }
}

#[async_trait]
impl EmailStatusService for EmailService {
    async fn provider_status(&self) -> Vec<ProviderStatus> {
        Self::provider_status(self).await
    }

    async fn queue_status(&self) -> Result<QueueStatus, crate::error::QueueError> {
        Self::queue_status(self).await
    }

    fn metrics(&self) -> ServiceMetrics {
        Self::metrics(self)
    }
}
