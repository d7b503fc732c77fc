// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Helpers go through the metrics-rs facade and are no-ops until a recorder
//! is installed, so library crates may call them unconditionally.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register metric descriptions. Called once after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "mostrador_messages_total",
        "Messages accepted, by direction and content kind"
    );
    describe_counter!(
        "mostrador_deliveries_total",
        "Outbound delivery outcomes (sent, retried, failed, expired, evicted)"
    );
    describe_histogram!(
        "mostrador_delivery_latency_seconds",
        "Time from enqueue to provider acknowledgement"
    );
    describe_gauge!("mostrador_queue_depth", "Pending jobs per priority tier");
    describe_gauge!("mostrador_queue_workers", "Delivery workers currently running");
    describe_gauge!(
        "mostrador_circuit_state",
        "Circuit state per dependency (0 closed, 1 half-open, 2 open)"
    );
    describe_counter!(
        "mostrador_circuit_rejections_total",
        "Calls rejected because a circuit was open"
    );
    describe_counter!(
        "mostrador_duplicates_suppressed_total",
        "Events dropped by the deduplication ledger"
    );
    describe_counter!(
        "mostrador_recovery_attempts_total",
        "Failed-message recovery attempts, by outcome"
    );
    describe_gauge!("mostrador_failed_messages", "Messages currently in failed status");
    describe_counter!(
        "mostrador_mode_changes_total",
        "Conversation control-mode transitions, by new mode"
    );
    describe_counter!(
        "mostrador_responder_decisions_total",
        "Automated responder gating decisions"
    );
    describe_gauge!("mostrador_hub_connections", "Open operator connections");
    describe_counter!("mostrador_hub_events_total", "Events published to the hub");
    describe_counter!(
        "mostrador_webhook_requests_total",
        "Provider webhook requests, by outcome"
    );
}

/// Count an accepted inbound or outbound message.
pub fn record_message(direction: &str, kind: &str) {
    metrics::counter!(
        "mostrador_messages_total",
        "direction" => direction.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Count a delivery outcome.
pub fn record_delivery(outcome: &str) {
    metrics::counter!("mostrador_deliveries_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_delivery_latency(seconds: f64) {
    metrics::histogram!("mostrador_delivery_latency_seconds").record(seconds);
}

pub fn set_queue_depth(priority: &str, depth: usize) {
    metrics::gauge!("mostrador_queue_depth", "priority" => priority.to_string()).set(depth as f64);
}

pub fn set_queue_workers(count: usize) {
    metrics::gauge!("mostrador_queue_workers").set(count as f64);
}

/// `state` is 0 closed, 1 half-open, 2 open.
pub fn set_circuit_state(breaker: &str, state: f64) {
    metrics::gauge!("mostrador_circuit_state", "breaker" => breaker.to_string()).set(state);
}

pub fn record_circuit_rejection(breaker: &str) {
    metrics::counter!("mostrador_circuit_rejections_total", "breaker" => breaker.to_string())
        .increment(1);
}

pub fn record_duplicate(direction: &str) {
    metrics::counter!("mostrador_duplicates_suppressed_total", "direction" => direction.to_string())
        .increment(1);
}

pub fn record_recovery_attempt(outcome: &str) {
    metrics::counter!("mostrador_recovery_attempts_total", "outcome" => outcome.to_string())
        .increment(1);
}

pub fn set_failed_messages(count: usize) {
    metrics::gauge!("mostrador_failed_messages").set(count as f64);
}

pub fn record_mode_change(mode: &str) {
    metrics::counter!("mostrador_mode_changes_total", "mode" => mode.to_string()).increment(1);
}

pub fn record_responder_decision(decision: &str) {
    metrics::counter!("mostrador_responder_decisions_total", "decision" => decision.to_string())
        .increment(1);
}

pub fn set_hub_connections(count: usize) {
    metrics::gauge!("mostrador_hub_connections").set(count as f64);
}

pub fn record_hub_event(event: &str) {
    metrics::counter!("mostrador_hub_events_total", "event" => event.to_string()).increment(1);
}

pub fn record_webhook(outcome: &str) {
    metrics::counter!("mostrador_webhook_requests_total", "outcome" => outcome.to_string())
        .increment(1);
}
