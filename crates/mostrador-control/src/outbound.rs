// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound sends: persist, deduplicate, announce, enqueue.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use mostrador_bus::{Hub, HubEvent};
use mostrador_core::{
    ControlMode, ConversationId, ConversationStore, Message, MessageContent, MessageStatus,
    MostradorError, NewMessage, Priority, SenderType,
};
use mostrador_resilience::{CircuitBreaker, DedupLedger};

use crate::queue::{DeliveryJob, DeliveryQueue, JobId};

/// A request to send one message to a conversation's counterpart.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub conversation_id: ConversationId,
    pub content: MessageContent,
    /// Caller idempotency key; a repeat returns the original message.
    pub client_id: String,
    pub priority: Priority,
    pub sender_type: SenderType,
    /// Agent id for agent-authored messages.
    pub sender_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    Queued { message: Message, job_id: JobId },
    /// The client id was already used; nothing new was sent.
    Duplicate { message: Message },
}

impl SendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            Self::Queued { message, .. } | Self::Duplicate { message } => message,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

pub struct OutboundService {
    store: Arc<dyn ConversationStore>,
    ledger: Arc<DedupLedger>,
    breaker: Arc<CircuitBreaker>,
    queue: DeliveryQueue,
    hub: Arc<Hub>,
}

impl OutboundService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        ledger: Arc<DedupLedger>,
        breaker: Arc<CircuitBreaker>,
        queue: DeliveryQueue,
        hub: Arc<Hub>,
    ) -> Self {
        Self {
            store,
            ledger,
            breaker,
            queue,
            hub,
        }
    }

    /// Persist the message as `pending` and hand it to the delivery queue.
    ///
    /// Returns before the provider is contacted. While the WhatsApp circuit
    /// is open the message is stored as `failed` and the call fails with
    /// [`MostradorError::CircuitOpen`]; recovery resends it later.
    pub async fn send(&self, request: OutboundRequest) -> Result<SendOutcome, MostradorError> {
        request.content.validate()?;
        let client_id = request.client_id.trim().to_string();
        if client_id.is_empty() {
            return Err(MostradorError::Validation("client_id must not be empty".into()));
        }

        let conversation = self
            .store
            .get_conversation(&request.conversation_id)
            .await?
            .ok_or_else(|| MostradorError::not_found("conversation", &request.conversation_id))?;

        if request.sender_type == SenderType::Agent && conversation.control_mode == ControlMode::AiOnly
        {
            return Err(MostradorError::Validation(format!(
                "conversation {} is in ai_only mode; agents cannot send",
                conversation.id
            )));
        }

        let key = DedupLedger::outbound_key(conversation.id.as_str(), &client_id);
        if !self.ledger.check_and_remember(&key) {
            return match self.store.find_by_client_id(&conversation.id, &client_id).await? {
                Some(message) => {
                    self.note_duplicate(&message);
                    Ok(SendOutcome::Duplicate { message })
                }
                None => Err(MostradorError::Validation(format!(
                    "send with client_id {client_id} is already in progress"
                ))),
            };
        }

        let result = self
            .persist_and_enqueue(&request, &conversation.counterpart, &client_id)
            .await;
        if result.is_err() {
            self.ledger.forget(&key);
        }
        result
    }

    async fn persist_and_enqueue(
        &self,
        request: &OutboundRequest,
        counterpart: &str,
        client_id: &str,
    ) -> Result<SendOutcome, MostradorError> {
        // The ledger may have expired while the row still exists.
        if let Some(message) = self
            .store
            .find_by_client_id(&request.conversation_id, client_id)
            .await?
        {
            self.note_duplicate(&message);
            return Ok(SendOutcome::Duplicate { message });
        }

        let now = Utc::now();
        let circuit_open = !self.breaker.is_call_permitted();
        let new = NewMessage {
            conversation_id: request.conversation_id.clone(),
            client_id: Some(client_id.to_string()),
            provider_message_id: None,
            sender_type: request.sender_type,
            sender_id: request.sender_id.clone(),
            content: request.content.clone(),
            status: if circuit_open {
                MessageStatus::Failed
            } else {
                MessageStatus::Pending
            },
            failure_reason: circuit_open.then(|| "whatsapp circuit open".to_string()),
            created_at: now,
        };
        let message = self.store.create_message(new).await?;
        mostrador_prometheus::record_message("outbound", &message.kind().to_string());

        if circuit_open {
            mostrador_prometheus::record_circuit_rejection(self.breaker.name());
            warn!(
                event = "circuit_open",
                conversation_id = %message.conversation_id,
                message_id = %message.id,
                "whatsapp circuit open, message stored as failed for recovery"
            );
            self.hub.emit_global(&HubEvent::MessageFailed {
                conversation_id: message.conversation_id.clone(),
                message_id: message.id,
                reason: "whatsapp circuit open".into(),
                retry_count: message.retry_count,
                permanent: false,
            });
            return Err(MostradorError::CircuitOpen {
                dependency: self.breaker.name().to_string(),
            });
        }

        self.hub.emit_to_topic(
            &message.conversation_id,
            &HubEvent::NewMessage {
                conversation_id: message.conversation_id.clone(),
                message: message.clone(),
                requires_agent_action: false,
            },
        );
        if let Err(e) = self
            .store
            .record_activity(&message.conversation_id, now, false)
            .await
        {
            warn!(conversation_id = %message.conversation_id, error = %e, "failed to record activity");
        }

        let job = DeliveryJob::new(&message, counterpart, request.priority);
        match self.queue.enqueue(job) {
            Ok(job_id) => {
                info!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.id,
                    job_id = %job_id,
                    sender = %message.sender_type,
                    priority = %request.priority,
                    "outbound message queued"
                );
                Ok(SendOutcome::Queued { message, job_id })
            }
            Err(err) => {
                self.store
                    .update_message_status(message.id, MessageStatus::Failed, Some(err.to_string()))
                    .await?;
                Err(err)
            }
        }
    }

    fn note_duplicate(&self, message: &Message) {
        mostrador_prometheus::record_duplicate("outbound");
        debug!(
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            client_id = message.client_id.as_deref().unwrap_or("-"),
            "duplicate outbound send ignored"
        );
    }
}
