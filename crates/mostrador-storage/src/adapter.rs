// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of [`ConversationStore`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use mostrador_config::model::StorageConfig;
use mostrador_core::{
    AdapterType, Conversation, ConversationId, ConversationPatch, ConversationStore,
    HealthStatus, Message, MessageId, MessageStatus, ModeChange, MostradorError, NewMessage,
    PluginAdapter,
};

use crate::database::{Database, map_tr_err};
use crate::queries::{conversations, messages};

/// SQLite-backed Conversation Store.
///
/// Delegates every operation to the typed query modules.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Open the database described by `config`, running migrations.
    pub async fn open(config: &StorageConfig) -> Result<Self, MostradorError> {
        let db = Database::open_with(
            &config.database_path,
            Duration::from_millis(config.busy_timeout_ms),
        )
        .await?;
        Ok(Self { db })
    }

    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Checkpoint the WAL so the database file is self-contained on exit.
    pub async fn close(&self) -> Result<(), MostradorError> {
        self.db.checkpoint().await?;
        debug!("sqlite store checkpointed");
        Ok(())
    }
}

#[async_trait]
impl PluginAdapter for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Store
    }

    async fn health_check(&self) -> Result<HealthStatus, MostradorError> {
        let probe = self
            .db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err);
        Ok(match probe {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn get_or_create_conversation(
        &self,
        counterpart: &str,
        contact_name: Option<&str>,
    ) -> Result<Conversation, MostradorError> {
        conversations::get_or_create(&self.db, counterpart, contact_name).await
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, MostradorError> {
        conversations::get(&self.db, id).await
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<Conversation, MostradorError> {
        conversations::update(&self.db, id, patch).await
    }

    async fn record_activity(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
        increment_unread: bool,
    ) -> Result<(), MostradorError> {
        conversations::record_activity(&self.db, id, at, increment_unread).await
    }

    async fn append_mode_history(&self, change: &ModeChange) -> Result<(), MostradorError> {
        conversations::append_mode_history(&self.db, change).await
    }

    async fn mode_history(&self, id: &ConversationId) -> Result<Vec<ModeChange>, MostradorError> {
        conversations::mode_history(&self.db, id).await
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, MostradorError> {
        messages::insert(&self.db, message).await
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, MostradorError> {
        messages::get(&self.db, id).await
    }

    async fn find_by_client_id(
        &self,
        conversation_id: &ConversationId,
        client_id: &str,
    ) -> Result<Option<Message>, MostradorError> {
        messages::find_by_client_id(&self.db, conversation_id, client_id).await
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, MostradorError> {
        messages::find_by_provider_id(&self.db, provider_message_id).await
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        failure_reason: Option<String>,
    ) -> Result<(), MostradorError> {
        messages::update_status(&self.db, id, status, failure_reason).await
    }

    async fn mark_sent(
        &self,
        id: MessageId,
        provider_message_id: &str,
    ) -> Result<(), MostradorError> {
        messages::mark_sent(&self.db, id, provider_message_id).await
    }

    async fn record_retry_attempt(
        &self,
        id: MessageId,
        at: DateTime<Utc>,
        cap: u32,
    ) -> Result<Message, MostradorError> {
        messages::record_retry_attempt(&self.db, id, at, cap).await
    }

    async fn recent_messages(
        &self,
        id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, MostradorError> {
        messages::recent(&self.db, id, limit).await
    }

    async fn list_failed(&self) -> Result<Vec<Message>, MostradorError> {
        messages::list_failed(&self.db).await
    }

    async fn fail_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, MostradorError> {
        let marked = messages::fail_stale_pending(&self.db, cutoff, reason).await?;
        if marked > 0 {
            debug!(marked, "stale pending messages marked failed");
        }
        Ok(marked)
    }

    async fn delete_failed_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, MostradorError> {
        messages::delete_failed_older_than(&self.db, cutoff).await
    }
}
