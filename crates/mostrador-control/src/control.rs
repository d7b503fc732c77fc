// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation control-plane: who may answer next.
//!
//! The combination rule lives in [`decide`]: `takeover` always suppresses
//! the automated responder, `ai_only` always allows it, and `spectator`
//! allows it only while `ai_mode` is `active` and no agent is assigned.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use mostrador_bus::{Hub, HubEvent};
use mostrador_core::{
    AiMode, ControlMode, Conversation, ConversationId, ConversationPatch, ConversationStore,
    ModeChange, MostradorError,
};

/// Outcome of the gating rule for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "ai_mode", rename_all = "snake_case")]
pub enum ResponderDecision {
    Allowed,
    SuppressedByTakeover,
    SuppressedByAiMode(AiMode),
    SuppressedByAssignment,
}

impl ResponderDecision {
    pub fn is_allowed(self) -> bool {
        self == Self::Allowed
    }

    /// Metric label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::SuppressedByTakeover => "suppressed_takeover",
            Self::SuppressedByAiMode(_) => "suppressed_ai_mode",
            Self::SuppressedByAssignment => "suppressed_assignment",
        }
    }
}

/// The single gating rule for the automated responder.
pub fn decide(conversation: &Conversation) -> ResponderDecision {
    match conversation.control_mode {
        ControlMode::Takeover => ResponderDecision::SuppressedByTakeover,
        ControlMode::AiOnly => ResponderDecision::Allowed,
        ControlMode::Spectator => {
            if conversation.ai_mode != AiMode::Active {
                ResponderDecision::SuppressedByAiMode(conversation.ai_mode)
            } else if conversation.assigned_agent_id.is_some() {
                ResponderDecision::SuppressedByAssignment
            } else {
                ResponderDecision::Allowed
            }
        }
    }
}

/// Owns every mutation of a conversation's control state.
///
/// Changes to one conversation are serialized by a per-conversation lock;
/// different conversations never contend.
pub struct ControlPlane {
    store: Arc<dyn ConversationStore>,
    hub: Arc<Hub>,
    locks: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl ControlPlane {
    pub fn new(store: Arc<dyn ConversationStore>, hub: Arc<Hub>) -> Self {
        Self {
            store,
            hub,
            locks: DashMap::new(),
        }
    }

    /// Read the conversation and apply [`decide`].
    pub async fn evaluate(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ResponderDecision, MostradorError> {
        let conversation = self.load(conversation_id).await?;
        Ok(decide(&conversation))
    }

    /// Whether the automated responder may answer now. Fails closed: a
    /// missing conversation or a store error yields `false`.
    pub async fn can_automated_responder_act(&self, conversation_id: &ConversationId) -> bool {
        match self.evaluate(conversation_id).await {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "control check failed, suppressing responder");
                false
            }
        }
    }

    /// Change the control mode.
    ///
    /// `takeover` requires an actor, assigns the conversation to them and
    /// turns `ai_mode` off. `spectator` and `ai_only` clear the assignment and
    /// turn `ai_mode` back on. Re-applying the current state is rejected.
    pub async fn set_mode(
        &self,
        conversation_id: &ConversationId,
        mode: ControlMode,
        actor_agent_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Conversation, MostradorError> {
        let actor = actor_agent_id.map(str::trim).filter(|a| !a.is_empty());
        if mode == ControlMode::Takeover && actor.is_none() {
            return Err(MostradorError::Validation(
                "takeover requires an acting agent".into(),
            ));
        }

        let lock = self.lock_for(conversation_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_mode(conversation_id, mode, actor, reason).await
        };
        drop(lock);
        self.release_lock(conversation_id);
        result
    }

    async fn apply_mode(
        &self,
        conversation_id: &ConversationId,
        mode: ControlMode,
        actor: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Conversation, MostradorError> {
        let current = self.load(conversation_id).await?;

        let (assigned, ai_mode) = match mode {
            ControlMode::Takeover => (actor.map(str::to_string), AiMode::Inactive),
            ControlMode::Spectator | ControlMode::AiOnly => (None, AiMode::Active),
        };

        if current.control_mode == mode
            && current.assigned_agent_id == assigned
            && current.ai_mode == ai_mode
        {
            return Err(MostradorError::Validation(format!(
                "conversation {conversation_id} is already in {mode} mode"
            )));
        }

        let patch = ConversationPatch {
            control_mode: Some(mode),
            ai_mode: Some(ai_mode),
            assigned_agent_id: Some(assigned),
            ..ConversationPatch::default()
        };
        let updated = self.store.update_conversation(conversation_id, patch).await?;

        let change = ModeChange {
            conversation_id: conversation_id.clone(),
            previous_mode: current.control_mode,
            new_mode: mode,
            previous_ai_mode: current.ai_mode,
            new_ai_mode: ai_mode,
            actor_agent_id: actor.map(str::to_string),
            reason: reason.map(str::to_string),
            changed_at: Utc::now(),
        };
        self.record(&updated, change).await?;
        Ok(updated)
    }

    /// Hand the conversation back to the automated responder.
    pub async fn release(
        &self,
        conversation_id: &ConversationId,
        actor_agent_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Conversation, MostradorError> {
        self.set_mode(conversation_id, ControlMode::Spectator, actor_agent_id, reason)
            .await
    }

    /// Pause or resume automation without changing the control mode.
    pub async fn set_ai_mode(
        &self,
        conversation_id: &ConversationId,
        ai_mode: AiMode,
        actor_agent_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Conversation, MostradorError> {
        let lock = self.lock_for(conversation_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_ai_mode(conversation_id, ai_mode, actor_agent_id, reason)
                .await
        };
        drop(lock);
        self.release_lock(conversation_id);
        result
    }

    async fn apply_ai_mode(
        &self,
        conversation_id: &ConversationId,
        ai_mode: AiMode,
        actor: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Conversation, MostradorError> {
        let current = self.load(conversation_id).await?;
        if current.ai_mode == ai_mode {
            return Err(MostradorError::Validation(format!(
                "conversation {conversation_id} already has ai_mode {ai_mode}"
            )));
        }

        let patch = ConversationPatch {
            ai_mode: Some(ai_mode),
            ..ConversationPatch::default()
        };
        let updated = self.store.update_conversation(conversation_id, patch).await?;

        let change = ModeChange {
            conversation_id: conversation_id.clone(),
            previous_mode: current.control_mode,
            new_mode: current.control_mode,
            previous_ai_mode: current.ai_mode,
            new_ai_mode: ai_mode,
            actor_agent_id: actor.map(str::to_string),
            reason: reason.map(str::to_string),
            changed_at: Utc::now(),
        };
        self.record(&updated, change).await?;
        Ok(updated)
    }

    /// Audit log for a conversation, oldest first.
    pub async fn mode_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ModeChange>, MostradorError> {
        self.load(conversation_id).await?;
        self.store.mode_history(conversation_id).await
    }

    async fn load(&self, conversation_id: &ConversationId) -> Result<Conversation, MostradorError> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| MostradorError::not_found("conversation", conversation_id))
    }

    async fn record(
        &self,
        updated: &Conversation,
        change: ModeChange,
    ) -> Result<(), MostradorError> {
        self.store.append_mode_history(&change).await?;

        info!(
            conversation_id = %change.conversation_id,
            previous_mode = %change.previous_mode,
            new_mode = %change.new_mode,
            ai_mode = %change.new_ai_mode,
            actor = change.actor_agent_id.as_deref().unwrap_or("-"),
            "conversation mode changed"
        );
        mostrador_prometheus::record_mode_change(&change.new_mode.to_string());

        let event = HubEvent::ConversationModeChanged {
            conversation_id: change.conversation_id.clone(),
            previous_mode: change.previous_mode,
            new_mode: change.new_mode,
            ai_mode: updated.ai_mode,
            assigned_agent_id: updated.assigned_agent_id.clone(),
            actor_agent_id: change.actor_agent_id,
            reason: change.reason,
        };
        self.hub.emit_to_topic_and_global(&change.conversation_id, &event);
        Ok(())
    }

    fn lock_for(&self, conversation_id: &ConversationId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(conversation_id.clone()).or_default().value())
    }

    fn release_lock(&self, conversation_id: &ConversationId) {
        self.locks
            .remove_if(conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conversation(mode: ControlMode, ai_mode: AiMode, agent: Option<&str>) -> Conversation {
        let mut c = Conversation::new("+5215550001", None, Utc::now());
        c.control_mode = mode;
        c.ai_mode = ai_mode;
        c.assigned_agent_id = agent.map(str::to_string);
        c
    }

    #[test]
    fn takeover_always_suppresses() {
        for ai in [AiMode::Active, AiMode::Inactive, AiMode::Paused] {
            assert_eq!(
                decide(&conversation(ControlMode::Takeover, ai, Some("ana"))),
                ResponderDecision::SuppressedByTakeover
            );
        }
    }

    #[test]
    fn ai_only_always_allows() {
        for ai in [AiMode::Active, AiMode::Inactive, AiMode::Paused] {
            assert!(decide(&conversation(ControlMode::AiOnly, ai, Some("ana"))).is_allowed());
        }
    }

    #[test]
    fn spectator_falls_back_to_ai_mode_then_assignment() {
        assert!(decide(&conversation(ControlMode::Spectator, AiMode::Active, None)).is_allowed());
        assert_eq!(
            decide(&conversation(ControlMode::Spectator, AiMode::Paused, None)),
            ResponderDecision::SuppressedByAiMode(AiMode::Paused)
        );
        assert_eq!(
            decide(&conversation(ControlMode::Spectator, AiMode::Active, Some("ana"))),
            ResponderDecision::SuppressedByAssignment
        );
    }

    #[test]
    fn decision_labels_are_distinct() {
        let labels = [
            ResponderDecision::Allowed.label(),
            ResponderDecision::SuppressedByTakeover.label(),
            ResponderDecision::SuppressedByAiMode(AiMode::Paused).label(),
            ResponderDecision::SuppressedByAssignment.label(),
        ];
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), 4);
    }
}
