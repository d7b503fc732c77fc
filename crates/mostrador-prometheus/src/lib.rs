// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics for Mostrador.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. The rendered
//! text is served by the gateway's `/metrics` endpoint.

pub mod recording;

use async_trait::async_trait;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use mostrador_core::traits::adapter::PluginAdapter;
use mostrador_core::types::{AdapterType, HealthStatus};
use mostrador_core::MostradorError;

pub use recording::{
    record_circuit_rejection, record_delivery, record_delivery_latency, record_duplicate,
    record_hub_event, record_message, record_mode_change, record_recovery_attempt,
    record_responder_decision, record_webhook, set_circuit_state, set_failed_messages,
    set_hub_connections, set_queue_depth, set_queue_workers,
};

/// Owns the process-wide Prometheus recorder.
pub struct PrometheusAdapter {
    handle: PrometheusHandle,
}

impl PrometheusAdapter {
    /// Install the Prometheus recorder globally.
    ///
    /// Only one recorder can exist per process; a second call fails.
    pub fn new() -> Result<Self, MostradorError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            MostradorError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[async_trait]
impl PluginAdapter for PrometheusAdapter {
    fn name(&self) -> &str {
        "prometheus"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Observability
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        Ok(HealthStatus::Healthy)
    }
}
