// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `mostrador serve` command implementation.
//!
//! Opens the SQLite store, wires the control-plane components around the
//! WhatsApp gateway and the automated responder, starts the background tasks
//! and serves the HTTP surface until SIGINT/SIGTERM. On shutdown the delivery
//! queue is drained before the store is checkpointed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use mostrador_bus::Hub;
use mostrador_config::MostradorConfig;
use mostrador_control::ControlContext;
use mostrador_core::{AutomatedResponder, MostradorError};
use mostrador_gateway::{GatewayState, HealthState, OperatorDirectory, WebhookSettings};
use mostrador_prometheus::PrometheusAdapter;
use mostrador_storage::SqliteStore;
use mostrador_whatsapp::WhatsAppGateway;

use crate::responder::{DisabledResponder, HttpResponder};
use crate::settings::{control_settings, hub_config};
use crate::shutdown;

pub async fn run_serve(config: MostradorConfig) -> Result<(), MostradorError> {
    let start_time = Instant::now();
    info!(service = %config.service.name, "starting mostrador serve");

    let prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>> =
        if config.prometheus.enabled {
            match PrometheusAdapter::new() {
                Ok(adapter) => Some(Arc::new(move || adapter.render())),
                Err(e) => {
                    warn!(error = %e, "prometheus initialization failed, continuing without metrics");
                    None
                }
            }
        } else {
            None
        };

    let store = Arc::new(SqliteStore::open(&config.storage).await?);
    let gateway = Arc::new(WhatsAppGateway::from_config(&config.whatsapp)?);
    let responder = build_responder(&config)?;
    let hub = Arc::new(Hub::new(hub_config(&config)));

    let directory = OperatorDirectory::from_config(&config.operators);
    if directory.is_empty() {
        warn!("no operators configured; every /v1 request will be rejected");
    }

    let ctx = Arc::new(ControlContext::new(
        control_settings(&config),
        store.clone(),
        gateway,
        responder,
        hub,
    ));

    // Messages left pending by a crash are handed to recovery.
    let max_age = Duration::from_secs(config.queue.max_job_age_secs);
    match ctx.recovery.recover_stale_pending(max_age).await {
        Ok(0) => {}
        Ok(count) => info!(count, "stale pending messages marked failed for recovery"),
        Err(e) => warn!(error = %e, "stale pending recovery failed"),
    }

    let cancel = shutdown::install_signal_handler();
    let tasks = ctx.start(cancel.clone());

    let state = GatewayState {
        ctx: Arc::clone(&ctx),
        identity: Arc::new(directory),
        webhook: WebhookSettings {
            verify_token: config.whatsapp.verify_token.clone(),
            app_secret: config.whatsapp.app_secret.clone(),
        },
        health: HealthState {
            start_time,
            prometheus_render,
        },
    };

    let served = mostrador_gateway::serve(&config.gateway, state, cancel.clone()).await;
    if let Err(e) = &served {
        error!(error = %e, "gateway exited with error");
    }
    // A bind failure returns before any signal arrives.
    cancel.cancel();

    let drain_timeout = Duration::from_secs(config.queue.drain_timeout_secs);
    if !ctx.queue.drain(drain_timeout).await {
        warn!(
            remaining = ctx.queue.stats().total,
            "delivery queue not drained before timeout; recovery will resend"
        );
    }
    for task in tasks {
        let _ = task.await;
    }

    if let Err(e) = store.close().await {
        warn!(error = %e, "failed to checkpoint store on shutdown");
    }
    info!("mostrador serve shutdown complete");
    served
}

fn build_responder(config: &MostradorConfig) -> Result<Arc<dyn AutomatedResponder>, MostradorError> {
    if config.responder.enabled {
        info!("automated responder enabled");
        Ok(Arc::new(HttpResponder::from_config(&config.responder)?))
    } else {
        info!("automated responder disabled");
        Ok(Arc::new(DisabledResponder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mostrador_core::PluginAdapter;

    #[test]
    fn disabled_responder_is_selected_by_default() {
        let config = MostradorConfig::default();
        let responder = build_responder(&config).unwrap();
        assert_eq!(responder.name(), "disabled-responder");
    }

    #[test]
    fn enabled_responder_needs_an_endpoint() {
        let mut config = MostradorConfig::default();
        config.responder.enabled = true;
        assert!(build_responder(&config).is_err());

        config.responder.endpoint = Some("http://127.0.0.1:9/reply".into());
        assert_eq!(build_responder(&config).unwrap().name(), "http-responder");
    }
}
