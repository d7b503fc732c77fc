// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted automated responder.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use mostrador_core::{
    AdapterType, AutomatedResponder, Conversation, ConversationId, HealthStatus, Message,
    MostradorError, PluginAdapter,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ResponderStep {
    Reply(String),
    Decline,
    Fail,
}

/// One recorded `respond` call.
#[derive(Debug, Clone)]
pub struct ResponderCall {
    pub conversation_id: ConversationId,
    pub transcript: Vec<Message>,
}

struct Script {
    steps: VecDeque<ResponderStep>,
    calls: Vec<ResponderCall>,
}

/// Pops one step per call; replies "mock reply" once the script is empty.
pub struct ScriptedResponder {
    script: Mutex<Script>,
}

impl Default for ScriptedResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedResponder {
    pub fn new() -> Self {
        Self::with_steps(Vec::new())
    }

    pub fn with_steps(steps: Vec<ResponderStep>) -> Self {
        Self {
            script: Mutex::new(Script {
                steps: steps.into(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn with_replies(replies: Vec<&str>) -> Self {
        Self::with_steps(
            replies
                .into_iter()
                .map(|r| ResponderStep::Reply(r.to_string()))
                .collect(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push_step(&self, step: ResponderStep) {
        self.lock().steps.push_back(step);
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn calls(&self) -> Vec<ResponderCall> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl PluginAdapter for ScriptedResponder {
    fn name(&self) -> &str {
        "scripted-responder"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Responder
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl AutomatedResponder for ScriptedResponder {
    async fn respond(
        &self,
        conversation: &Conversation,
        transcript: &[Message],
    ) -> Result<Option<String>, MostradorError> {
        let step = {
            let mut script = self.lock();
            script.calls.push(ResponderCall {
                conversation_id: conversation.id.clone(),
                transcript: transcript.to_vec(),
            });
            script.steps.pop_front()
        };
        match step {
            Some(ResponderStep::Reply(text)) => Ok(Some(text)),
            Some(ResponderStep::Decline) => Ok(None),
            Some(ResponderStep::Fail) => Err(MostradorError::Responder {
                message: "scripted responder failure".into(),
                source: None,
            }),
            None => Ok(Some("mock reply".to_string())),
        }
    }
}
