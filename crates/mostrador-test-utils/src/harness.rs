// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness wiring a full [`ControlContext`] with mock collaborators.
//!
//! Timing-sensitive tests should run with `#[tokio::test(start_paused = true)]`
//! so backoff and breaker timers advance instantly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mostrador_bus::{ConnectionHandle, Hub, HubConfig};
use mostrador_control::{ControlContext, ControlSettings, IngestOutcome};
use mostrador_core::{
    InboundEvent, InboundMessage, MessageContent, MessageStatus, MostradorError, Principal, Role,
    StatusReceipt,
};

use crate::memory_store::MemoryStore;
use crate::mock_gateway::{GatewayStep, ScriptedGateway};
use crate::mock_responder::{ResponderStep, ScriptedResponder};

pub struct TestHarnessBuilder {
    settings: ControlSettings,
    gateway_steps: Vec<GatewayStep>,
    responder_steps: Vec<ResponderStep>,
    hub: HubConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut settings = ControlSettings::default();
        settings.retry.jitter_ratio = 0.0;
        Self {
            settings,
            gateway_steps: Vec::new(),
            responder_steps: Vec::new(),
            hub: HubConfig::default(),
        }
    }

    pub fn with_gateway_steps(mut self, steps: Vec<GatewayStep>) -> Self {
        self.gateway_steps = steps;
        self
    }

    pub fn with_responder_steps(mut self, steps: Vec<ResponderStep>) -> Self {
        self.responder_steps = steps;
        self
    }

    /// Adjust any control setting before the context is built.
    pub fn with_settings(mut self, edit: impl FnOnce(&mut ControlSettings)) -> Self {
        edit(&mut self.settings);
        self
    }

    pub fn with_hub_config(mut self, config: HubConfig) -> Self {
        self.hub = config;
        self
    }

    pub fn build(self) -> TestHarness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(ScriptedGateway::with_steps(self.gateway_steps));
        let responder = Arc::new(ScriptedResponder::with_steps(self.responder_steps));
        let hub = Arc::new(Hub::new(self.hub));
        let ctx = Arc::new(ControlContext::new(
            self.settings,
            store.clone(),
            gateway.clone(),
            responder.clone(),
            Arc::clone(&hub),
        ));
        TestHarness {
            store,
            gateway,
            responder,
            hub,
            ctx,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }
}

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub responder: Arc<ScriptedResponder>,
    pub hub: Arc<Hub>,
    pub ctx: Arc<ControlContext>,
    pub cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with default settings and accepting mocks.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Spawn the background tasks (retry timer, sweeps, liveness).
    pub fn start(&mut self) {
        let handles = self.ctx.start(self.cancel.clone());
        self.tasks.extend(handles);
    }

    pub fn text_event(from: &str, provider_message_id: &str, body: &str) -> InboundEvent {
        InboundEvent::Message(InboundMessage {
            provider_message_id: provider_message_id.to_string(),
            from: from.to_string(),
            contact_name: None,
            timestamp: Utc::now(),
            content: MessageContent::text(body),
        })
    }

    pub fn status_event(provider_message_id: &str, status: MessageStatus) -> InboundEvent {
        InboundEvent::Status(StatusReceipt {
            provider_message_id: provider_message_id.to_string(),
            status,
            timestamp: Utc::now(),
            error: None,
        })
    }

    /// Ingest one inbound text message.
    pub async fn receive_text(
        &self,
        from: &str,
        provider_message_id: &str,
        body: &str,
    ) -> Result<IngestOutcome, MostradorError> {
        self.ctx
            .ingest
            .handle(Self::text_event(from, provider_message_id, body))
            .await
    }

    /// Register an operator connection on the hub.
    pub fn connect(&self, id: &str, role: Role) -> ConnectionHandle {
        self.hub.register(Principal {
            id: id.to_string(),
            display_name: id.to_string(),
            role,
        })
    }

    /// Wait until the queue is empty, no worker is busy and no retry is
    /// scheduled. Returns `false` if that did not happen within `limit`.
    pub async fn settle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let stats = self.ctx.queue.stats();
            if stats.total == 0 && stats.active_workers == 0 && stats.scheduled_retries == 0 {
                // Let spawned status writes land.
                tokio::task::yield_now().await;
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Drain a connection's buffered frames as JSON values.
    pub fn frames(handle: &mut ConnectionHandle) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = handle.rx.try_recv() {
            if let Ok(value) = serde_json::from_str(&frame) {
                frames.push(value);
            }
        }
        frames
    }

    /// Event names buffered for a connection, in order.
    pub fn event_names(handle: &mut ConnectionHandle) -> Vec<String> {
        Self::frames(handle)
            .iter()
            .filter_map(|f| f["event"].as_str().map(str::to_string))
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
