// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory `ConversationStore` with the same idempotency rules as the
//! SQLite store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mostrador_core::{
    AdapterType, Conversation, ConversationId, ConversationPatch, ConversationStore,
    HealthStatus, Message, MessageId, MessageStatus, ModeChange, MostradorError, NewMessage,
    PluginAdapter,
};

#[derive(Default)]
struct Inner {
    conversations: HashMap<ConversationId, Conversation>,
    by_counterpart: HashMap<String, ConversationId>,
    messages: BTreeMap<i64, Message>,
    next_message_id: i64,
    history: Vec<ModeChange>,
}

/// Store backed by hash maps. Every write can be made to fail with
/// [`MemoryStore::fail_writes`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make subsequent writes fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), MostradorError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MostradorError::storage(std::io::Error::other(
                "memory store writes disabled",
            )));
        }
        Ok(())
    }

    pub fn conversation_for(&self, counterpart: &str) -> Option<Conversation> {
        let inner = self.lock();
        inner
            .by_counterpart
            .get(counterpart)
            .and_then(|id| inner.conversations.get(id))
            .cloned()
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().conversations.len()
    }

    /// Every stored message, in insertion order.
    pub fn all_messages(&self) -> Vec<Message> {
        self.lock().messages.values().cloned().collect()
    }

    pub fn messages_in(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.lock()
            .messages
            .values()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.lock().messages.get(&id.0).cloned()
    }

    /// Insert a conversation as-is, replacing any with the same id.
    pub fn insert_conversation(&self, conversation: Conversation) {
        let mut inner = self.lock();
        inner
            .by_counterpart
            .insert(conversation.counterpart.clone(), conversation.id.clone());
        inner
            .conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Overwrite fields of a stored message, for arranging test state.
    pub fn edit_message(&self, id: MessageId, edit: impl FnOnce(&mut Message)) {
        if let Some(message) = self.lock().messages.get_mut(&id.0) {
            edit(message);
        }
    }
}

#[async_trait]
impl PluginAdapter for MemoryStore {
    fn name(&self) -> &str {
        "memory-store"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_or_create_conversation(
        &self,
        counterpart: &str,
        contact_name: Option<&str>,
    ) -> Result<Conversation, MostradorError> {
        self.check_writable()?;
        let mut inner = self.lock();
        if let Some(id) = inner.by_counterpart.get(counterpart).cloned() {
            if let Some(existing) = inner.conversations.get_mut(&id) {
                if existing.contact_name.is_none() {
                    existing.contact_name = contact_name.map(str::to_string);
                }
                return Ok(existing.clone());
            }
        }
        let conversation =
            Conversation::new(counterpart, contact_name.map(str::to_string), Utc::now());
        inner
            .by_counterpart
            .insert(counterpart.to_string(), conversation.id.clone());
        inner
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, MostradorError> {
        Ok(self.lock().conversations.get(id).cloned())
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Conversation, MostradorError> {
        self.check_writable()?;
        let mut inner = self.lock();
        let conversation = inner
            .conversations
            .get_mut(id)
            .ok_or_else(|| MostradorError::not_found("conversation", id))?;
        patch.apply(conversation, Utc::now());
        Ok(conversation.clone())
    }

    async fn record_activity(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
        increment_unread: bool,
    ) -> Result<(), MostradorError> {
        self.check_writable()?;
        let mut inner = self.lock();
        let conversation = inner
            .conversations
            .get_mut(id)
            .ok_or_else(|| MostradorError::not_found("conversation", id))?;
        conversation.last_message_at = Some(conversation.last_message_at.map_or(at, |t| t.max(at)));
        if increment_unread {
            conversation.unread_count += 1;
        }
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn append_mode_history(&self, change: &ModeChange) -> Result<(), MostradorError> {
        self.check_writable()?;
        self.lock().history.push(change.clone());
        Ok(())
    }

    async fn mode_history(&self, id: &ConversationId) -> Result<Vec<ModeChange>, MostradorError> {
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|c| &c.conversation_id == id)
            .cloned()
            .collect())
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, MostradorError> {
        self.check_writable()?;
        let mut inner = self.lock();
        let existing = inner.messages.values().find(|m| {
            let same_client = message.client_id.is_some()
                && m.conversation_id == message.conversation_id
                && m.client_id == message.client_id;
            let same_provider = message.provider_message_id.is_some()
                && m.provider_message_id == message.provider_message_id;
            same_client || same_provider
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(MostradorError::not_found(
                "conversation",
                &message.conversation_id,
            ));
        }

        inner.next_message_id += 1;
        let id = inner.next_message_id;
        let stored = Message {
            id: MessageId(id),
            conversation_id: message.conversation_id,
            client_id: message.client_id,
            provider_message_id: message.provider_message_id,
            sender_type: message.sender_type,
            sender_id: message.sender_id,
            content: message.content,
            status: message.status,
            failure_reason: message.failure_reason,
            retry_count: 0,
            created_at: message.created_at,
            updated_at: message.created_at,
            last_retry_at: None,
        };
        inner.messages.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, MostradorError> {
        Ok(self.lock().messages.get(&id.0).cloned())
    }

    async fn find_by_client_id(
        &self,
        conversation_id: &ConversationId,
        client_id: &str,
    ) -> Result<Option<Message>, MostradorError> {
        Ok(self
            .lock()
            .messages
            .values()
            .find(|m| &m.conversation_id == conversation_id && m.client_id.as_deref() == Some(client_id))
            .cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, MostradorError> {
        Ok(self
            .lock()
            .messages
            .values()
            .find(|m| m.provider_message_id.as_deref() == Some(provider_message_id))
            .cloned())
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        failure_reason: Option<String>,
    ) -> Result<(), MostradorError> {
        self.check_writable()?;
        let mut inner = self.lock();
        let message = inner
            .messages
            .get_mut(&id.0)
            .ok_or_else(|| MostradorError::not_found("message", id))?;
        message.status = status;
        message.failure_reason = failure_reason;
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_sent(
        &self,
        id: MessageId,
        provider_message_id: &str,
    ) -> Result<(), MostradorError> {
        self.check_writable()?;
        let mut inner = self.lock();
        let message = inner
            .messages
            .get_mut(&id.0)
            .ok_or_else(|| MostradorError::not_found("message", id))?;
        message.status = MessageStatus::Sent;
        message.provider_message_id = Some(provider_message_id.to_string());
        message.failure_reason = None;
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn record_retry_attempt(
        &self,
        id: MessageId,
        at: DateTime<Utc>,
        cap: u32,
    ) -> Result<Message, MostradorError> {
        self.check_writable()?;
        let mut inner = self.lock();
        let message = inner
            .messages
            .get_mut(&id.0)
            .ok_or_else(|| MostradorError::not_found("message", id))?;
        message.retry_count = (message.retry_count + 1).min(cap);
        message.last_retry_at = Some(at);
        message.updated_at = at;
        Ok(message.clone())
    }

    async fn recent_messages(
        &self,
        id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, MostradorError> {
        let inner = self.lock();
        let mut recent: Vec<Message> = inner
            .messages
            .values()
            .rev()
            .filter(|m| &m.conversation_id == id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn list_failed(&self) -> Result<Vec<Message>, MostradorError> {
        let mut failed: Vec<Message> = self
            .lock()
            .messages
            .values()
            .filter(|m| m.status == MessageStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|m| (m.created_at, m.id.0));
        Ok(failed)
    }

    async fn fail_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, MostradorError> {
        self.check_writable()?;
        let mut inner = self.lock();
        let mut count = 0;
        for message in inner.messages.values_mut() {
            if message.status == MessageStatus::Pending && message.created_at < cutoff {
                message.status = MessageStatus::Failed;
                message.failure_reason = Some(reason.to_string());
                message.updated_at = Utc::now();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_failed_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, MostradorError> {
        self.check_writable()?;
        let mut inner = self.lock();
        let before = inner.messages.len();
        inner
            .messages
            .retain(|_, m| !(m.status == MessageStatus::Failed && m.created_at < cutoff));
        Ok((before - inner.messages.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mostrador_core::{MessageContent, SenderType};

    fn outbound(conversation_id: &ConversationId, client_id: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.clone(),
            client_id: Some(client_id.to_string()),
            provider_message_id: None,
            sender_type: SenderType::Agent,
            sender_id: Some("ana".into()),
            content: MessageContent::text("hola"),
            status: MessageStatus::Pending,
            failure_reason: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn client_id_insert_is_idempotent() {
        let store = MemoryStore::new();
        let c = store
            .get_or_create_conversation("+5215550001", None)
            .await
            .unwrap();
        let a = store.create_message(outbound(&c.id, "k1")).await.unwrap();
        let b = store.create_message(outbound(&c.id, "k1")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.all_messages().len(), 1);
    }

    #[tokio::test]
    async fn retry_counter_saturates() {
        let store = MemoryStore::new();
        let c = store.get_or_create_conversation("+1", None).await.unwrap();
        let m = store.create_message(outbound(&c.id, "k")).await.unwrap();
        for _ in 0..5 {
            store.record_retry_attempt(m.id, Utc::now(), 3).await.unwrap();
        }
        assert_eq!(store.message(m.id).unwrap().retry_count, 3);
    }

    #[tokio::test]
    async fn get_or_create_is_keyed_on_counterpart() {
        let store = MemoryStore::new();
        let a = store
            .get_or_create_conversation("+1", Some("Lucía"))
            .await
            .unwrap();
        let b = store.get_or_create_conversation("+1", None).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.conversation_count(), 1);
    }
}
