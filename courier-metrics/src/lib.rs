//! OpenTelemetry metrics for the courier dispatcher
//!
//! Instruments are created from the global meter provider. Until
//! [`init_metrics`] installs an OTLP exporter the global provider is a no-op,
//! so recording is always safe and costs next to nothing.
//!
//! # Architecture
//!
//! ```text
//! courier → OTLP/HTTP → OpenTelemetry Collector → Prometheus (scrape) → Grafana
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use courier_metrics::{init_metrics, DeliveryMetrics, MetricsConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = init_metrics(&MetricsConfig::default())?;
//! let metrics = DeliveryMetrics::new();
//! metrics.record_sent("primary", 1);
//! # drop(provider);
//! # Ok(())
//! # }
//! ```

mod config;
mod delivery;
mod error;
mod exporter;

pub use config::MetricsConfig;
pub use delivery::DeliveryMetrics;
pub use error::MetricsError;
pub use opentelemetry_sdk::metrics::SdkMeterProvider;

/// Install the OTLP meter provider described by `config`
///
/// The provider becomes the global one, so every [`DeliveryMetrics`] created
/// afterwards exports through it. It is also returned so the runner can
/// flush it on shutdown. Returns `Ok(None)` when metrics are disabled.
///
/// # Errors
///
/// If the configuration is invalid or the OTLP exporter cannot be built.
pub fn init_metrics(config: &MetricsConfig) -> Result<Option<SdkMeterProvider>, MetricsError> {
    if !config.enabled {
        tracing::info!("Dispatch metrics disabled");
        return Ok(None);
    }

    config.validate()?;

    tracing::info!(
        endpoint = %config.endpoint,
        service_name = %config.service_name,
        interval_secs = config.export_interval_secs,
        "Exporting dispatch metrics over OTLP"
    );

    let provider = exporter::otlp_meter_provider(config)?;
    opentelemetry::global::set_meter_provider(provider.clone());

    Ok(Some(provider))
}
