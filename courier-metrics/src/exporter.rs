//! OTLP/HTTP push of the dispatch instruments

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};

use crate::{MetricsConfig, MetricsError};

/// Meter provider that pushes to `config.endpoint` every export interval,
/// tagged with `config.service_name`
///
/// # Errors
///
/// If the OTLP exporter rejects the endpoint.
pub fn otlp_meter_provider(config: &MetricsConfig) -> Result<SdkMeterProvider, MetricsError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(config.endpoint.clone())
        .build()
        .map_err(|e| MetricsError::Exporter(e.to_string()))?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.export_interval())
        .build();

    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}
