//! Status queries for dashboards and health endpoints
//!
//! Decouples read-only consumers from the concrete `EmailService`, so a
//! health endpoint can be tested against a stub.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn degraded(service: &dyn EmailStatusService) -> bool {
//!     service
//!         .provider_status()
//!         .await
//!         .iter()
//!         .any(|p| p.circuit_state != CircuitState::Closed)
//! }
//! ```

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    circuit_breaker::{CircuitBreakerStats, CircuitState},
    error::QueueError,
    stats::ServiceMetrics,
    types::QueuedMessage,
};

/// Health of one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    /// The provider's own health signal
    pub healthy: bool,
    pub circuit_state: CircuitState,
    /// Full breaker statistics
    pub circuit: CircuitBreakerStats,
}

/// Contents of the retry queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub length: usize,
    /// Entries, oldest first
    pub items: Vec<QueuedMessage>,
}

/// Read-only view of a running dispatch engine
#[async_trait]
pub trait EmailStatusService: Send + Sync {
    /// Every provider in priority order
    async fn provider_status(&self) -> Vec<ProviderStatus>;

    /// Current retry queue contents
    async fn queue_status(&self) -> Result<QueueStatus, QueueError>;

    /// Aggregate counters
    fn metrics(&self) -> ServiceMetrics;
}
