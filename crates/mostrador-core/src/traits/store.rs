// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation Store trait: the single source of truth for conversations,
//! messages and the mode-change audit log.
//!
//! Every mutation is a single-row upsert or an append; implementations are
//! expected to serialize conflicting writes to the same row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MostradorError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Conversation, ConversationId, ConversationPatch, Message, MessageId, MessageStatus,
    ModeChange, NewMessage,
};

#[async_trait]
pub trait ConversationStore: PluginAdapter {
    // --- Conversations ---

    /// Idempotent get-or-create keyed on the counterpart phone/handle.
    async fn get_or_create_conversation(
        &self,
        counterpart: &str,
        contact_name: Option<&str>,
    ) -> Result<Conversation, MostradorError>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, MostradorError>;

    /// Apply `patch` and return the updated row.
    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Conversation, MostradorError>;

    /// Bump `last_message_at` and, for customer messages, `unread_count`.
    async fn record_activity(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
        increment_unread: bool,
    ) -> Result<(), MostradorError>;

    async fn append_mode_history(&self, change: &ModeChange) -> Result<(), MostradorError>;

    /// Mode changes for a conversation, oldest first.
    async fn mode_history(&self, id: &ConversationId) -> Result<Vec<ModeChange>, MostradorError>;

    // --- Messages ---

    /// Insert a message.
    ///
    /// Idempotent on `(conversation_id, client_id)` and on
    /// `provider_message_id`: a colliding insert returns the existing row.
    async fn create_message(&self, message: NewMessage) -> Result<Message, MostradorError>;

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, MostradorError>;

    async fn find_by_client_id(
        &self,
        conversation_id: &ConversationId,
        client_id: &str,
    ) -> Result<Option<Message>, MostradorError>;

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, MostradorError>;

    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        failure_reason: Option<String>,
    ) -> Result<(), MostradorError>;

    /// Mark a message `sent`, record its provider id and clear any failure reason.
    async fn mark_sent(&self, id: MessageId, provider_message_id: &str)
    -> Result<(), MostradorError>;

    /// Increment `retry_count` (saturating at `cap`) and set `last_retry_at`.
    async fn record_retry_attempt(
        &self,
        id: MessageId,
        at: DateTime<Utc>,
        cap: u32,
    ) -> Result<Message, MostradorError>;

    /// The latest `limit` messages of a conversation, oldest first.
    async fn recent_messages(
        &self,
        id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, MostradorError>;

    /// All messages in `failed` status, oldest first.
    async fn list_failed(&self) -> Result<Vec<Message>, MostradorError>;

    /// Mark `pending` messages created before `cutoff` as `failed`.
    async fn fail_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, MostradorError>;

    /// Hard-delete `failed` messages created before `cutoff`.
    async fn delete_failed_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, MostradorError>;
}
