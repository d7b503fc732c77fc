// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted messaging gateway.
//!
//! Each `send` pops the next [`GatewayStep`]; once the script is empty the
//! fallback step applies (accept by default). Accepted sends are captured
//! for assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use mostrador_core::{
    AdapterType, GatewayErrorKind, HealthStatus, MessageContent, MessagingGateway,
    MostradorError, PluginAdapter, SendReceipt,
};

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayStep {
    Accept,
    /// Fail with this HTTP status.
    Status(u16),
    /// Fail with a connection-level error.
    Network,
    /// Wait, then accept.
    Delay(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub to: String,
    pub content: MessageContent,
    pub provider_message_id: String,
}

struct Script {
    steps: VecDeque<GatewayStep>,
    fallback: GatewayStep,
    sent: Vec<SentMessage>,
}

pub struct ScriptedGateway {
    script: Mutex<Script>,
    calls: AtomicU32,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    /// A gateway that accepts everything.
    pub fn new() -> Self {
        Self::with_steps(Vec::new())
    }

    pub fn with_steps(steps: Vec<GatewayStep>) -> Self {
        Self {
            script: Mutex::new(Script {
                steps: steps.into(),
                fallback: GatewayStep::Accept,
                sent: Vec::new(),
            }),
            calls: AtomicU32::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push_step(&self, step: GatewayStep) {
        self.lock().steps.push_back(step);
    }

    /// Step used once the script is exhausted.
    pub fn set_fallback(&self, step: GatewayStep) {
        self.lock().fallback = step;
    }

    /// Number of `send` invocations, successful or not.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter_map(|s| match &s.content {
                MessageContent::Text { body } => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    fn accept(&self, to: &str, content: &MessageContent, n: u32) -> SendReceipt {
        let provider_message_id = format!("wamid.test.{n}");
        self.lock().sent.push(SentMessage {
            to: to.to_string(),
            content: content.clone(),
            provider_message_id: provider_message_id.clone(),
        });
        SendReceipt {
            provider_message_id,
        }
    }
}

#[async_trait]
impl PluginAdapter for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted-gateway"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Gateway
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl MessagingGateway for ScriptedGateway {
    async fn send(&self, to: &str, content: &MessageContent) -> Result<SendReceipt, MostradorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = {
            let mut script = self.lock();
            let fallback = script.fallback.clone();
            script.steps.pop_front().unwrap_or(fallback)
        };
        match step {
            GatewayStep::Accept => Ok(self.accept(to, content, n)),
            GatewayStep::Status(status) => Err(MostradorError::gateway_status(
                status,
                format!("scripted HTTP {status}"),
            )),
            GatewayStep::Network => Err(MostradorError::gateway(
                GatewayErrorKind::Network,
                "scripted ECONNRESET",
            )),
            GatewayStep::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.accept(to, content, n))
            }
        }
    }
}
