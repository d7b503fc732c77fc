// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation control-plane, outbound delivery and failed-message recovery.
//!
//! [`ControlContext`] wires the components together:
//!
//! - [`ControlPlane`] decides whether the automated responder may answer.
//! - [`InboundPipeline`] stores webhook events and triggers the responder.
//! - [`OutboundService`] persists sends and hands them to the
//!   [`DeliveryQueue`], which calls the gateway through the WhatsApp breaker.
//! - [`FailedMessageRecovery`] resends what the queue gave up on.

pub mod context;
pub mod control;
pub mod ingest;
pub mod outbound;
pub mod queue;
pub mod recovery;

pub use context::{ControlContext, ControlSettings, RESPONDER_BREAKER, WHATSAPP_BREAKER};
pub use control::{ControlPlane, ResponderDecision, decide};
pub use ingest::{InboundPipeline, IngestOutcome, ResponderOutcome};
pub use outbound::{OutboundRequest, OutboundService, SendOutcome};
pub use queue::{DeliveryJob, DeliveryQueue, JobId, QueueSettings, QueueStats};
pub use recovery::{
    FailedMessageRecovery, RecoverySettings, RetryResult, RetryStats, SkipReason, SweepReport,
};

use mostrador_resilience::{CircuitBreaker, CircuitState};

/// Export the breaker state gauge (0 closed, 1 half-open, 2 open).
pub(crate) fn publish_breaker_state(breaker: &CircuitBreaker) {
    let value = match breaker.state() {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    mostrador_prometheus::set_circuit_state(breaker.name(), value);
}
