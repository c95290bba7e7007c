//! Where dispatch metrics go and how often

use std::time::Duration;

use serde::Deserialize;

use crate::MetricsError;

/// The `metrics` section of the courier configuration
///
/// ```ron
/// metrics: (
///     enabled: true,
///     endpoint: "http://collector:4318/v1/metrics",
///     export_interval_secs: 15,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricsConfig {
    /// Push dispatch metrics over OTLP. Off by default; instruments then
    /// record into the global no-op provider.
    #[serde(default)]
    pub enabled: bool,

    /// OTLP/HTTP collector endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// `service.name` attached to every exported series
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Seconds between pushes to the collector
    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".to_string()
}

fn default_service_name() -> String {
    "courier".to_string()
}

const fn default_export_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            service_name: default_service_name(),
            export_interval_secs: default_export_interval_secs(),
        }
    }
}

impl MetricsConfig {
    /// Push interval as a `Duration`
    #[must_use]
    pub const fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs)
    }

    /// Reject settings the exporter cannot run with
    ///
    /// # Errors
    ///
    /// If the endpoint is blank or the export interval is zero.
    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.endpoint.trim().is_empty() {
            return Err(MetricsError::InvalidConfig("endpoint must not be empty"));
        }
        if self.export_interval_secs == 0 {
            return Err(MetricsError::InvalidConfig(
                "export_interval_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: MetricsConfig = ron::from_str("(enabled: true)").unwrap();

        assert!(config.enabled);
        assert_eq!(config.endpoint, "http://localhost:4318/v1/metrics");
        assert_eq!(config.service_name, "courier");
        assert_eq!(config.export_interval(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let config = MetricsConfig {
            endpoint: "  ".to_string(),
            ..MetricsConfig::default()
        };
        assert!(matches!(config.validate(), Err(MetricsError::InvalidConfig(_))));

        let config = MetricsConfig {
            export_interval_secs: 0,
            ..MetricsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
