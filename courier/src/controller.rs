use std::sync::{Arc, LazyLock};

use courier_common::{Signal, internal, logging};
use courier_delivery::{EmailService, ProviderConfig, ServiceConfig};
use courier_metrics::{DeliveryMetrics, MetricsConfig, init_metrics};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::intake;

/// Everything the runner reads from its configuration file
///
/// ```ron
/// Courier(
///     service: (
///         retry: (max_attempts: 3),
///         queue: File(path: "/var/spool/courier/retry"),
///     ),
///     providers: [
///         Log("primary"),
///         Failing("backup", "503 Service Unavailable"),
///     ],
///     metrics: (enabled: false),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    service: ServiceConfig,
    #[serde(alias = "provider", default)]
    providers: Vec<ProviderConfig>,
    #[serde(default)]
    metrics: MetricsConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for CTRL+C or SIGTERM, then tell everyone subscribed to stop
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    // Nobody listening just means the intake already finished
    let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);

    Ok(())
}

impl Courier {
    /// Assemble the dispatch engine described by this configuration
    ///
    /// # Errors
    ///
    /// If the service configuration is invalid, no provider is configured, or
    /// the retry queue cannot be opened.
    pub fn build(self, metrics: Arc<DeliveryMetrics>) -> anyhow::Result<EmailService> {
        let service = EmailService::builder(self.service)
            .providers(self.providers.into_iter().map(ProviderConfig::into_provider))
            .metrics(metrics)
            .build()?;

        Ok(service)
    }

    /// Run the dispatcher until stdin closes or a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// This function will return an error if metrics or the dispatch engine
    /// fail to initialise, or if reading submissions fails.
    pub async fn run(mut self) -> anyhow::Result<()> {
        logging::init();

        let meter_provider = init_metrics(&std::mem::take(&mut self.metrics))?;
        let service = self.build(Arc::new(DeliveryMetrics::new()))?;

        internal!(level = INFO, "Controller running");

        service.start_queue_processing();

        let ret = tokio::select! {
            r = intake::serve(
                &service,
                tokio::io::BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
                SHUTDOWN_BROADCAST.subscribe(),
            ) => {
                r
            }
            r = shutdown() => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        service.shutdown().await;

        if let Some(provider) = meter_provider
            && let Err(e) = provider.shutdown()
        {
            tracing::warn!(error = %e, "Failed to flush metrics on shutdown");
        }

        ret
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_full_config() {
        let courier: Courier = ron::from_str(
            r#"Courier(
                service: (
                    retry: (max_attempts: 5, base_delay_ms: 10),
                    rate_limit: (max_requests: 20),
                    enable_queue: false,
                ),
                providers: [Log("primary"), Failing("backup", "503 Service Unavailable")],
                metrics: (enabled: false),
            )"#,
        )
        .expect("valid config");

        assert_eq!(courier.service.retry.max_attempts, 5);
        assert_eq!(courier.service.rate_limit.max_requests, 20);
        assert!(!courier.service.enable_queue);
        assert_eq!(courier.providers.len(), 2);
        assert!(!courier.metrics.enabled);

        let service = courier.build(Arc::new(DeliveryMetrics::new())).unwrap();
        assert!(service.circuit_breaker("primary").is_some());
        assert!(service.circuit_breaker("backup").is_some());
        assert!(service.circuit_breaker("missing").is_none());
    }

    #[test]
    fn test_build_requires_providers() {
        let courier: Courier = ron::from_str("Courier()").expect("valid config");
        assert!(courier.providers.is_empty());

        let err = courier.build(Arc::new(DeliveryMetrics::new())).unwrap_err();
        assert!(err.to_string().contains("provider"));
    }
}
