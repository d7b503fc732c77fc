// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Translation of the loaded configuration into runtime settings.

use std::time::Duration;

use mostrador_bus::HubConfig;
use mostrador_config::model::{BreakerSettings, RetrySettings};
use mostrador_config::MostradorConfig;
use mostrador_control::{ControlSettings, QueueSettings, RecoverySettings};
use mostrador_resilience::{CircuitBreakerConfig, RetryPolicy};

pub fn breaker_config(settings: &BreakerSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: settings.failure_threshold,
        recovery_timeout: Duration::from_secs(settings.recovery_timeout_secs),
        monitoring_period: Duration::from_secs(settings.monitoring_period_secs),
        call_timeout: settings.call_timeout_secs.map(Duration::from_secs),
    }
}

pub fn retry_policy(settings: &RetrySettings) -> RetryPolicy {
    RetryPolicy {
        max_attempts: settings.max_attempts,
        backoff: settings
            .backoff_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect(),
        jitter_ratio: settings.jitter_ratio,
        retryable_markers: settings.retryable_markers.clone(),
    }
}

pub fn control_settings(config: &MostradorConfig) -> ControlSettings {
    let queue = &config.queue;
    let recovery = &config.recovery;
    ControlSettings {
        breaker_defaults: breaker_config(&config.resilience.circuit_breaker),
        whatsapp_breaker: breaker_config(&config.resilience.whatsapp_breaker),
        breaker_decay_interval: Duration::from_secs(config.resilience.decay_interval_secs),
        retry: retry_policy(&config.resilience.retry),
        dedup_ttl: config.dedup.ttl(),
        dedup_eviction_interval: Duration::from_secs(config.dedup.eviction_interval_secs),
        queue: QueueSettings {
            max_size: queue.max_size,
            workers: queue.workers,
            max_job_age: Duration::from_secs(queue.max_job_age_secs),
            sweep_interval: Duration::from_secs(queue.sweep_interval_secs),
        },
        recovery: RecoverySettings {
            enabled: recovery.enabled,
            interval: Duration::from_secs(recovery.interval_secs),
            batch_size: recovery.batch_size,
            batch_pause: Duration::from_millis(recovery.batch_pause_ms),
            max_retries: recovery.max_retries,
            retention: Duration::from_secs(recovery.retention_hours * 3600),
            cleanup_interval: Duration::from_secs(recovery.cleanup_interval_secs),
        },
        transcript_limit: config.responder.transcript_limit,
    }
}

pub fn hub_config(config: &MostradorConfig) -> HubConfig {
    let hub = &config.hub;
    HubConfig {
        ping_interval: Duration::from_secs(hub.ping_interval_secs),
        latency_warn_threshold: Duration::from_millis(hub.latency_warn_ms),
        idle_timeout: Duration::from_secs(hub.idle_timeout_secs),
        liveness_check_interval: Duration::from_secs(hub.liveness_check_interval_secs),
        outbound_buffer: hub.outbound_buffer,
    }
}
