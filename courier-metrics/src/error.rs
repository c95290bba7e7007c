use thiserror::Error;

/// Why dispatch metrics could not be set up
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The `metrics` section holds an unusable value
    #[error("Invalid metrics configuration: {0}")]
    InvalidConfig(&'static str),

    /// The OTLP exporter could not be built
    #[error("Failed to build OTLP metrics exporter: {0}")]
    Exporter(String),
}
