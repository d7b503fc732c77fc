// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation and mode-history operations.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use mostrador_core::{Conversation, ConversationId, ConversationPatch, ModeChange, MostradorError};

use crate::database::{Database, map_tr_err};
use crate::models::{
    CONVERSATION_COLUMNS, MODE_CHANGE_COLUMNS, conversation_from_row, encode_ts,
    mode_change_from_row,
};

pub(crate) fn select_conversation(
    conn: &Connection,
    id: &str,
) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
        params![id],
        conversation_from_row,
    )
    .optional()
}

/// Get-or-create keyed on `counterpart`.
///
/// A known conversation keeps its contact name unless it had none.
pub async fn get_or_create(
    db: &Database,
    counterpart: &str,
    contact_name: Option<&str>,
) -> Result<Conversation, MostradorError> {
    let fresh = Conversation::new(counterpart, contact_name.map(str::to_string), Utc::now());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversations (id, counterpart, contact_name, status, control_mode,
                     ai_mode, unread_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)
                 ON CONFLICT(counterpart) DO UPDATE
                     SET contact_name = COALESCE(conversations.contact_name, excluded.contact_name)",
                params![
                    fresh.id.as_str(),
                    fresh.counterpart,
                    fresh.contact_name,
                    fresh.status.to_string(),
                    fresh.control_mode.to_string(),
                    fresh.ai_mode.to_string(),
                    encode_ts(&fresh.created_at),
                ],
            )?;
            conn.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE counterpart = ?1"),
                params![fresh.counterpart],
                conversation_from_row,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, id: &ConversationId) -> Result<Option<Conversation>, MostradorError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select_conversation(conn, &id))
        .await
        .map_err(map_tr_err)
}

/// Apply `patch` inside a transaction and return the updated row.
pub async fn update(
    db: &Database,
    id: &ConversationId,
    patch: ConversationPatch,
) -> Result<Conversation, MostradorError> {
    let key = id.to_string();
    let updated = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(mut conversation) = select_conversation(&tx, &key)? else {
                return Ok(None);
            };
            patch.apply(&mut conversation, Utc::now());
            tx.execute(
                "UPDATE conversations
                 SET status = ?1, control_mode = ?2, ai_mode = ?3, assigned_agent_id = ?4,
                     contact_name = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    conversation.status.to_string(),
                    conversation.control_mode.to_string(),
                    conversation.ai_mode.to_string(),
                    conversation.assigned_agent_id,
                    conversation.contact_name,
                    encode_ts(&conversation.updated_at),
                    key,
                ],
            )?;
            tx.commit()?;
            Ok(Some(conversation))
        })
        .await
        .map_err(map_tr_err)?;
    updated.ok_or_else(|| MostradorError::not_found("conversation", id))
}

/// Move `last_message_at` forward to `at` and optionally bump the unread counter.
pub async fn record_activity(
    db: &Database,
    id: &ConversationId,
    at: DateTime<Utc>,
    increment_unread: bool,
) -> Result<(), MostradorError> {
    let key = id.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE conversations
                 SET last_message_at = CASE
                         WHEN last_message_at IS NULL OR last_message_at < ?1 THEN ?1
                         ELSE last_message_at
                     END,
                     unread_count = unread_count + ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    encode_ts(&at),
                    i64::from(increment_unread),
                    encode_ts(&Utc::now()),
                    key
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(MostradorError::not_found("conversation", id));
    }
    Ok(())
}

pub async fn append_mode_history(db: &Database, change: &ModeChange) -> Result<(), MostradorError> {
    let change = change.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO mode_history (conversation_id, previous_mode, new_mode,
                     previous_ai_mode, new_ai_mode, actor_agent_id, reason, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    change.conversation_id.as_str(),
                    change.previous_mode.to_string(),
                    change.new_mode.to_string(),
                    change.previous_ai_mode.to_string(),
                    change.new_ai_mode.to_string(),
                    change.actor_agent_id,
                    change.reason,
                    encode_ts(&change.changed_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Mode changes for a conversation, oldest first.
pub async fn mode_history(
    db: &Database,
    id: &ConversationId,
) -> Result<Vec<ModeChange>, MostradorError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MODE_CHANGE_COLUMNS} FROM mode_history
                 WHERE conversation_id = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![id], mode_change_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mostrador_core::{AiMode, ControlMode};
    use tempfile::tempdir;

    async fn setup() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn get_or_create_keeps_first_name_and_id() {
        let (db, _dir) = setup().await;
        let first = get_or_create(&db, "+5215550001", None).await.unwrap();
        assert_eq!(first.contact_name, None);

        let named = get_or_create(&db, "+5215550001", Some("Lucía")).await.unwrap();
        assert_eq!(named.id, first.id);
        assert_eq!(named.contact_name.as_deref(), Some("Lucía"));

        let again = get_or_create(&db, "+5215550001", Some("Otra")).await.unwrap();
        assert_eq!(again.contact_name.as_deref(), Some("Lucía"));
        assert_eq!(again.control_mode, ControlMode::Spectator);
        assert_eq!(again.ai_mode, AiMode::Active);
    }

    #[tokio::test]
    async fn update_applies_patch_and_clears_assignment() {
        let (db, _dir) = setup().await;
        let c = get_or_create(&db, "+1", None).await.unwrap();

        let taken = update(
            &db,
            &c.id,
            ConversationPatch {
                control_mode: Some(ControlMode::Takeover),
                ai_mode: Some(AiMode::Inactive),
                assigned_agent_id: Some(Some("ana".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(taken.assigned_agent_id.as_deref(), Some("ana"));

        let released = update(
            &db,
            &c.id,
            ConversationPatch {
                control_mode: Some(ControlMode::Spectator),
                assigned_agent_id: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(released.assigned_agent_id, None);
        assert_eq!(released.ai_mode, AiMode::Inactive);

        let stored = get(&db, &c.id).await.unwrap().unwrap();
        assert_eq!(stored.control_mode, ControlMode::Spectator);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let (db, _dir) = setup().await;
        let missing = ConversationId::from("nope");
        assert!(matches!(
            update(&db, &missing, ConversationPatch::default()).await,
            Err(MostradorError::NotFound { .. })
        ));
        assert!(matches!(
            record_activity(&db, &missing, Utc::now(), true).await,
            Err(MostradorError::NotFound { .. })
        ));
        assert!(get(&db, &missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn activity_never_moves_backwards() {
        let (db, _dir) = setup().await;
        let c = get_or_create(&db, "+1", None).await.unwrap();
        let now = Utc::now();
        record_activity(&db, &c.id, now, true).await.unwrap();
        record_activity(&db, &c.id, now - chrono::Duration::minutes(5), true)
            .await
            .unwrap();
        record_activity(&db, &c.id, now, false).await.unwrap();

        let stored = get(&db, &c.id).await.unwrap().unwrap();
        assert_eq!(stored.unread_count, 2);
        assert_eq!(
            stored.last_message_at.map(|t| encode_ts(&t)),
            Some(encode_ts(&now))
        );
    }

    #[tokio::test]
    async fn history_is_returned_oldest_first() {
        let (db, _dir) = setup().await;
        let c = get_or_create(&db, "+1", None).await.unwrap();
        for (from, to) in [
            (ControlMode::Spectator, ControlMode::Takeover),
            (ControlMode::Takeover, ControlMode::AiOnly),
        ] {
            append_mode_history(
                &db,
                &ModeChange {
                    conversation_id: c.id.clone(),
                    previous_mode: from,
                    new_mode: to,
                    previous_ai_mode: AiMode::Active,
                    new_ai_mode: AiMode::Active,
                    actor_agent_id: Some("ana".into()),
                    reason: None,
                    changed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        }
        let history = mode_history(&db, &c.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_mode, ControlMode::Takeover);
        assert_eq!(history[1].new_mode, ControlMode::AiOnly);
    }
}
