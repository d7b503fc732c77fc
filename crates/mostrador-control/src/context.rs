// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Explicitly constructed application context.
//!
//! Owns one instance of every stateful component and wires them together.
//! Nothing in the workspace reaches for a global; whoever needs a component
//! gets it from here.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mostrador_bus::Hub;
use mostrador_core::{AutomatedResponder, ConversationStore, MessagingGateway};
use mostrador_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, DedupLedger, RetryPolicy};

use crate::control::ControlPlane;
use crate::ingest::InboundPipeline;
use crate::outbound::OutboundService;
use crate::queue::{DeliveryQueue, QueueSettings};
use crate::recovery::{FailedMessageRecovery, RecoverySettings};

/// Breaker name of the WhatsApp Cloud API dependency.
pub const WHATSAPP_BREAKER: &str = "whatsapp";
/// Breaker name of the automated responder dependency.
pub const RESPONDER_BREAKER: &str = "responder";

#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub breaker_defaults: CircuitBreakerConfig,
    pub whatsapp_breaker: CircuitBreakerConfig,
    pub breaker_decay_interval: Duration,
    pub retry: RetryPolicy,
    pub dedup_ttl: Duration,
    pub dedup_eviction_interval: Duration,
    pub queue: QueueSettings,
    pub recovery: RecoverySettings,
    /// Messages handed to the automated responder per call.
    pub transcript_limit: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            breaker_defaults: CircuitBreakerConfig::default(),
            whatsapp_breaker: CircuitBreakerConfig::whatsapp(),
            breaker_decay_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            dedup_ttl: mostrador_resilience::dedup::DEFAULT_TTL,
            dedup_eviction_interval: Duration::from_secs(300),
            queue: QueueSettings::default(),
            recovery: RecoverySettings::default(),
            transcript_limit: 20,
        }
    }
}

pub struct ControlContext {
    pub store: Arc<dyn ConversationStore>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub responder: Arc<dyn AutomatedResponder>,
    pub hub: Arc<Hub>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub ledger: Arc<DedupLedger>,
    pub control: Arc<ControlPlane>,
    pub queue: DeliveryQueue,
    pub outbound: Arc<OutboundService>,
    pub recovery: Arc<FailedMessageRecovery>,
    pub ingest: Arc<InboundPipeline>,
    settings: ControlSettings,
}

impl ControlContext {
    pub fn new(
        settings: ControlSettings,
        store: Arc<dyn ConversationStore>,
        gateway: Arc<dyn MessagingGateway>,
        responder: Arc<dyn AutomatedResponder>,
        hub: Arc<Hub>,
    ) -> Self {
        let breakers = Arc::new(
            CircuitBreakerRegistry::new(settings.breaker_defaults.clone())
                .with_profile(WHATSAPP_BREAKER, settings.whatsapp_breaker.clone()),
        );
        let whatsapp = breakers.get_or_create(WHATSAPP_BREAKER);
        let responder_breaker = breakers.get_or_create(RESPONDER_BREAKER);
        let ledger = Arc::new(DedupLedger::new(settings.dedup_ttl));
        let control = Arc::new(ControlPlane::new(Arc::clone(&store), Arc::clone(&hub)));

        let queue = DeliveryQueue::new(
            settings.queue.clone(),
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&whatsapp),
            settings.retry.clone(),
            Arc::clone(&hub),
        );
        let outbound = Arc::new(OutboundService::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&whatsapp),
            queue.clone(),
            Arc::clone(&hub),
        ));
        let recovery = Arc::new(FailedMessageRecovery::new(
            settings.recovery.clone(),
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&whatsapp),
            Arc::clone(&hub),
        ));
        let ingest = Arc::new(InboundPipeline::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&control),
            Arc::clone(&responder),
            responder_breaker,
            Arc::clone(&outbound),
            Arc::clone(&hub),
            settings.transcript_limit,
        ));

        Self {
            store,
            gateway,
            responder,
            hub,
            breakers,
            ledger,
            control,
            queue,
            outbound,
            recovery,
            ingest,
            settings,
        }
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    /// Spawn every background task. They stop when `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.ledger.spawn_eviction(
                "dedup",
                self.settings.dedup_eviction_interval,
                cancel.clone(),
            ),
            self.breakers
                .spawn_decay_task(self.settings.breaker_decay_interval, cancel.clone()),
            self.hub.spawn_liveness(cancel.clone()),
        ];
        handles.extend(self.queue.start(cancel.clone()));
        handles.extend(self.recovery.spawn(cancel));
        info!(tasks = handles.len(), "background tasks started");
        handles
    }
}
