// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound pipeline: dedup, persist, fan out, and maybe let the automated
//! responder answer.
//!
//! Events of one webhook payload are handled one after another so messages
//! of a conversation are stored in arrival order. Failures here never reach
//! the webhook response.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mostrador_bus::{Hub, HubEvent};
use mostrador_core::{
    AutomatedResponder, Conversation, ConversationStore, InboundEvent, InboundMessage, Message,
    MessageContent, MessageId, MessageStatus, MostradorError, NewMessage, Priority, SenderType,
    StatusReceipt,
};
use mostrador_resilience::{CircuitBreaker, DedupLedger};

use crate::control::{ControlPlane, ResponderDecision, decide};
use crate::outbound::{OutboundRequest, OutboundService};

/// What the automated responder did for one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "responder", rename_all = "snake_case")]
pub enum ResponderOutcome {
    /// The reply was persisted and queued (or already existed).
    Replied { message: Message },
    Declined,
    Suppressed { decision: ResponderDecision },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Duplicate,
    Stored {
        message: Message,
        responder: ResponderOutcome,
    },
    StatusApplied {
        message_id: MessageId,
        status: MessageStatus,
    },
    /// The receipt would move the message backwards.
    StatusIgnored {
        message_id: MessageId,
        current: MessageStatus,
        requested: MessageStatus,
    },
    /// A receipt for a message this service never stored.
    UnknownMessage,
}

pub struct InboundPipeline {
    store: Arc<dyn ConversationStore>,
    ledger: Arc<DedupLedger>,
    control: Arc<ControlPlane>,
    responder: Arc<dyn AutomatedResponder>,
    responder_breaker: Arc<CircuitBreaker>,
    outbound: Arc<OutboundService>,
    hub: Arc<Hub>,
    transcript_limit: usize,
}

impl InboundPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        ledger: Arc<DedupLedger>,
        control: Arc<ControlPlane>,
        responder: Arc<dyn AutomatedResponder>,
        responder_breaker: Arc<CircuitBreaker>,
        outbound: Arc<OutboundService>,
        hub: Arc<Hub>,
        transcript_limit: usize,
    ) -> Self {
        Self {
            store,
            ledger,
            control,
            responder,
            responder_breaker,
            outbound,
            hub,
            transcript_limit,
        }
    }

    pub async fn handle(&self, event: InboundEvent) -> Result<IngestOutcome, MostradorError> {
        match event {
            InboundEvent::Message(message) => self.handle_message(message).await,
            InboundEvent::Status(receipt) => self.handle_status(receipt).await,
        }
    }

    /// Handle events in order. One failing event does not stop the rest.
    pub async fn handle_batch(
        &self,
        events: Vec<InboundEvent>,
    ) -> Vec<Result<IngestOutcome, MostradorError>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            let provider_id = event.provider_message_id().to_string();
            let result = self.handle(event).await;
            match &result {
                Ok(outcome) => {
                    mostrador_prometheus::record_webhook(outcome_label(outcome));
                }
                Err(e) => {
                    mostrador_prometheus::record_webhook("error");
                    error!(provider_message_id = %provider_id, error = %e, "inbound event failed");
                }
            }
            results.push(result);
        }
        results
    }

    /// Process a webhook payload in the background.
    pub fn spawn_batch(self: &Arc<Self>, events: Vec<InboundEvent>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.handle_batch(events).await;
        })
    }

    pub async fn handle_message(
        &self,
        inbound: InboundMessage,
    ) -> Result<IngestOutcome, MostradorError> {
        inbound.content.validate()?;
        let key = DedupLedger::inbound_key(&inbound.provider_message_id);
        if !self.ledger.check_and_remember(&key) {
            mostrador_prometheus::record_duplicate("inbound");
            debug!(provider_message_id = %inbound.provider_message_id, "duplicate inbound message ignored");
            return Ok(IngestOutcome::Duplicate);
        }

        let result = self.store_and_respond(inbound).await;
        if result.is_err() {
            self.ledger.forget(&key);
        }
        result
    }

    async fn store_and_respond(
        &self,
        inbound: InboundMessage,
    ) -> Result<IngestOutcome, MostradorError> {
        if self
            .store
            .find_by_provider_id(&inbound.provider_message_id)
            .await?
            .is_some()
        {
            mostrador_prometheus::record_duplicate("inbound");
            debug!(provider_message_id = %inbound.provider_message_id, "inbound message already stored");
            return Ok(IngestOutcome::Duplicate);
        }

        let conversation = self
            .store
            .get_or_create_conversation(&inbound.from, inbound.contact_name.as_deref())
            .await?;
        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation.id.clone(),
                client_id: None,
                provider_message_id: Some(inbound.provider_message_id.clone()),
                sender_type: SenderType::User,
                sender_id: None,
                content: inbound.content,
                status: MessageStatus::Delivered,
                failure_reason: None,
                created_at: inbound.timestamp,
            })
            .await?;
        mostrador_prometheus::record_message("inbound", &message.kind().to_string());
        self.store
            .record_activity(&conversation.id, inbound.timestamp, true)
            .await?;
        let conversation = self
            .store
            .get_conversation(&conversation.id)
            .await?
            .unwrap_or(conversation);

        let decision = decide(&conversation);
        mostrador_prometheus::record_responder_decision(decision.label());
        info!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            kind = %message.kind(),
            mode = %conversation.control_mode,
            decision = decision.label(),
            "inbound message stored"
        );

        self.hub.emit_to_topic(
            &conversation.id,
            &HubEvent::NewMessage {
                conversation_id: conversation.id.clone(),
                message: message.clone(),
                requires_agent_action: !decision.is_allowed(),
            },
        );
        self.hub.emit_global(&HubEvent::ConversationUpdated {
            conversation_id: conversation.id.clone(),
            unread_count: conversation.unread_count,
            last_message_at: conversation.last_message_at,
        });

        let responder = if decision.is_allowed() {
            self.respond(&conversation, &inbound.provider_message_id).await
        } else {
            ResponderOutcome::Suppressed { decision }
        };
        Ok(IngestOutcome::Stored { message, responder })
    }

    async fn respond(&self, conversation: &Conversation, trigger_id: &str) -> ResponderOutcome {
        let transcript = match self
            .store
            .recent_messages(&conversation.id, self.transcript_limit)
            .await
        {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "could not load transcript");
                return ResponderOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let reply = self
            .responder_breaker
            .call(|| self.responder.respond(conversation, &transcript))
            .await;
        crate::publish_breaker_state(&self.responder_breaker);

        let text = match reply {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => {
                debug!(conversation_id = %conversation.id, "responder declined");
                return ResponderOutcome::Declined;
            }
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "automated responder failed");
                return ResponderOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        // An agent may have taken over while the responder was thinking.
        match self.control.evaluate(&conversation.id).await {
            Ok(decision) if decision.is_allowed() => {}
            Ok(decision) => {
                info!(conversation_id = %conversation.id, decision = decision.label(), "reply discarded, control changed");
                return ResponderOutcome::Suppressed { decision };
            }
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "control re-check failed, discarding reply");
                return ResponderOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }

        let request = OutboundRequest {
            conversation_id: conversation.id.clone(),
            content: MessageContent::text(text),
            client_id: format!("bot:{trigger_id}"),
            priority: Priority::Normal,
            sender_type: SenderType::Bot,
            sender_id: None,
        };
        match self.outbound.send(request).await {
            Ok(outcome) => ResponderOutcome::Replied {
                message: outcome.message().clone(),
            },
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "could not queue responder reply");
                ResponderOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Apply a provider delivery receipt. Statuses only move forward.
    pub async fn handle_status(
        &self,
        receipt: StatusReceipt,
    ) -> Result<IngestOutcome, MostradorError> {
        let Some(message) = self
            .store
            .find_by_provider_id(&receipt.provider_message_id)
            .await?
        else {
            debug!(provider_message_id = %receipt.provider_message_id, "status for unknown message");
            return Ok(IngestOutcome::UnknownMessage);
        };

        if !message.status.can_advance_to(receipt.status) {
            debug!(
                message_id = %message.id,
                current = %message.status,
                requested = %receipt.status,
                "stale status receipt ignored"
            );
            return Ok(IngestOutcome::StatusIgnored {
                message_id: message.id,
                current: message.status,
                requested: receipt.status,
            });
        }

        let reason = (receipt.status == MessageStatus::Failed).then(|| {
            receipt
                .error
                .clone()
                .unwrap_or_else(|| "provider reported failure".to_string())
        });
        self.store
            .update_message_status(message.id, receipt.status, reason.clone())
            .await?;
        debug!(message_id = %message.id, status = %receipt.status, "message status advanced");

        self.hub.emit_to_topic(
            &message.conversation_id,
            &HubEvent::MessageStatusUpdate {
                conversation_id: message.conversation_id.clone(),
                message_id: message.id,
                status: receipt.status,
                provider_message_id: Some(receipt.provider_message_id.clone()),
                reason: reason.clone(),
            },
        );
        if let Some(reason) = reason {
            warn!(message_id = %message.id, reason = %reason, "provider reported delivery failure");
            self.hub.emit_global(&HubEvent::MessageFailed {
                conversation_id: message.conversation_id.clone(),
                message_id: message.id,
                reason,
                retry_count: message.retry_count,
                permanent: false,
            });
        }

        Ok(IngestOutcome::StatusApplied {
            message_id: message.id,
            status: receipt.status,
        })
    }
}

fn outcome_label(outcome: &IngestOutcome) -> &'static str {
    match outcome {
        IngestOutcome::Duplicate => "duplicate",
        IngestOutcome::Stored { .. } => "stored",
        IngestOutcome::StatusApplied { .. } => "status_applied",
        IngestOutcome::StatusIgnored { .. } => "status_ignored",
        IngestOutcome::UnknownMessage => "unknown_message",
    }
}
