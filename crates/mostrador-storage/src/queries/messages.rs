// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message operations.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use mostrador_core::{
    ConversationId, Message, MessageId, MessageStatus, MostradorError, NewMessage,
};

use crate::database::{Database, map_tr_err};
use crate::models::{MESSAGE_COLUMNS, encode_content, encode_ts, message_from_row};

fn select_message(conn: &Connection, id: i64) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![id],
        message_from_row,
    )
    .optional()
}

fn select_by_client_id(
    conn: &Connection,
    conversation_id: &str,
    client_id: &str,
) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 AND client_id = ?2"
        ),
        params![conversation_id, client_id],
        message_from_row,
    )
    .optional()
}

fn select_by_provider_id(
    conn: &Connection,
    provider_message_id: &str,
) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE provider_message_id = ?1"),
        params![provider_message_id],
        message_from_row,
    )
    .optional()
}

/// Insert a message, returning the existing row on a client-id or provider-id
/// collision.
pub async fn insert(db: &Database, message: NewMessage) -> Result<Message, MostradorError> {
    let content = encode_content(&message.content)?;
    let conversation_id = message.conversation_id.clone();
    let stored = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let conversation = message.conversation_id.as_str();

            if let Some(client_id) = message.client_id.as_deref() {
                if let Some(existing) = select_by_client_id(&tx, conversation, client_id)? {
                    return Ok(Some(existing));
                }
            }
            if let Some(provider_id) = message.provider_message_id.as_deref() {
                if let Some(existing) = select_by_provider_id(&tx, provider_id)? {
                    return Ok(Some(existing));
                }
            }

            let known: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
                params![conversation],
                |row| row.get(0),
            )?;
            if !known {
                return Ok(None);
            }

            let created_at = encode_ts(&message.created_at);
            tx.execute(
                "INSERT INTO messages (conversation_id, client_id, provider_message_id,
                     sender_type, sender_id, content, status, failure_reason, retry_count,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
                params![
                    conversation,
                    message.client_id,
                    message.provider_message_id,
                    message.sender_type.to_string(),
                    message.sender_id,
                    content,
                    message.status.to_string(),
                    message.failure_reason,
                    created_at,
                ],
            )?;
            let inserted = select_message(&tx, tx.last_insert_rowid())?;
            tx.commit()?;
            Ok(inserted)
        })
        .await
        .map_err(map_tr_err)?;
    stored.ok_or_else(|| MostradorError::not_found("conversation", &conversation_id))
}

pub async fn get(db: &Database, id: MessageId) -> Result<Option<Message>, MostradorError> {
    db.connection()
        .call(move |conn| select_message(conn, id.0))
        .await
        .map_err(map_tr_err)
}

pub async fn find_by_client_id(
    db: &Database,
    conversation_id: &ConversationId,
    client_id: &str,
) -> Result<Option<Message>, MostradorError> {
    let conversation_id = conversation_id.to_string();
    let client_id = client_id.to_string();
    db.connection()
        .call(move |conn| select_by_client_id(conn, &conversation_id, &client_id))
        .await
        .map_err(map_tr_err)
}

pub async fn find_by_provider_id(
    db: &Database,
    provider_message_id: &str,
) -> Result<Option<Message>, MostradorError> {
    let provider_message_id = provider_message_id.to_string();
    db.connection()
        .call(move |conn| select_by_provider_id(conn, &provider_message_id))
        .await
        .map_err(map_tr_err)
}

pub async fn update_status(
    db: &Database,
    id: MessageId,
    status: MessageStatus,
    failure_reason: Option<String>,
) -> Result<(), MostradorError> {
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages SET status = ?1, failure_reason = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    status.to_string(),
                    failure_reason,
                    encode_ts(&Utc::now()),
                    id.0
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(MostradorError::not_found("message", id));
    }
    Ok(())
}

pub async fn mark_sent(
    db: &Database,
    id: MessageId,
    provider_message_id: &str,
) -> Result<(), MostradorError> {
    let provider_message_id = provider_message_id.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages
                 SET status = ?1, provider_message_id = ?2, failure_reason = NULL, updated_at = ?3
                 WHERE id = ?4",
                params![
                    MessageStatus::Sent.to_string(),
                    provider_message_id,
                    encode_ts(&Utc::now()),
                    id.0
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(MostradorError::not_found("message", id));
    }
    Ok(())
}

/// Increment `retry_count`, saturating at `cap`, and stamp `last_retry_at`.
pub async fn record_retry_attempt(
    db: &Database,
    id: MessageId,
    at: DateTime<Utc>,
    cap: u32,
) -> Result<Message, MostradorError> {
    let updated = db
        .connection()
        .call(move |conn| {
            let stamp = encode_ts(&at);
            conn.execute(
                "UPDATE messages
                 SET retry_count = MIN(retry_count + 1, ?1), last_retry_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![cap, stamp, id.0],
            )?;
            select_message(conn, id.0)
        })
        .await
        .map_err(map_tr_err)?;
    updated.ok_or_else(|| MostradorError::not_found("message", id))
}

/// The latest `limit` messages of a conversation, oldest first.
pub async fn recent(
    db: &Database,
    conversation_id: &ConversationId,
    limit: usize,
) -> Result<Vec<Message>, MostradorError> {
    let conversation_id = conversation_id.to_string();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut messages = db
        .connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![conversation_id, limit], message_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)?;
    messages.reverse();
    Ok(messages)
}

/// Every `failed` message, oldest first.
pub async fn list_failed(db: &Database) -> Result<Vec<Message>, MostradorError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE status = ?1 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![MessageStatus::Failed.to_string()], message_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn fail_stale_pending(
    db: &Database,
    cutoff: DateTime<Utc>,
    reason: &str,
) -> Result<u64, MostradorError> {
    let reason = reason.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages SET status = ?1, failure_reason = ?2, updated_at = ?3
                 WHERE status = ?4 AND created_at < ?5",
                params![
                    MessageStatus::Failed.to_string(),
                    reason,
                    encode_ts(&Utc::now()),
                    MessageStatus::Pending.to_string(),
                    encode_ts(&cutoff),
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed as u64)
}

pub async fn delete_failed_older_than(
    db: &Database,
    cutoff: DateTime<Utc>,
) -> Result<u64, MostradorError> {
    let deleted = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM messages WHERE status = ?1 AND created_at < ?2",
                params![MessageStatus::Failed.to_string(), encode_ts(&cutoff)],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(deleted as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::conversations;
    use mostrador_core::{MessageContent, SenderType};
    use tempfile::tempdir;

    async fn setup() -> (Database, ConversationId, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).await.unwrap();
        let c = conversations::get_or_create(&db, "+5215550001", None)
            .await
            .unwrap();
        (db, c.id, dir)
    }

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
    async fn content_survives_storage() {
        let (db, conv, _dir) = setup().await;
        let mut new = outbound(&conv, "k1");
        new.content = MessageContent::Location {
            latitude: 19.43,
            longitude: -99.13,
            name: Some("Zócalo".into()),
            address: None,
        };
        let stored = insert(&db, new.clone()).await.unwrap();
        let loaded = get(&db, stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, new.content);
        assert_eq!(loaded.sender_type, SenderType::Agent);
        assert_eq!(loaded.status, MessageStatus::Pending);
        assert_eq!(loaded.retry_count, 0);
    }

    #[tokio::test]
    async fn duplicate_keys_return_existing_row() {
        let (db, conv, _dir) = setup().await;
        let a = insert(&db, outbound(&conv, "k1")).await.unwrap();
        let b = insert(&db, outbound(&conv, "k1")).await.unwrap();
        assert_eq!(a.id, b.id);

        let mut inbound = outbound(&conv, "unused");
        inbound.client_id = None;
        inbound.provider_message_id = Some("wamid.1".into());
        inbound.sender_type = SenderType::User;
        let first = insert(&db, inbound.clone()).await.unwrap();
        let second = insert(&db, inbound).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(recent(&db, &conv, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn insert_into_unknown_conversation_is_not_found() {
        let (db, _conv, _dir) = setup().await;
        let err = insert(&db, outbound(&ConversationId::from("ghost"), "k"))
            .await
            .unwrap_err();
        assert!(matches!(err, MostradorError::NotFound { entity: "conversation", .. }));
    }

    #[tokio::test]
    async fn mark_sent_records_provider_id_and_clears_reason() {
        let (db, conv, _dir) = setup().await;
        let m = insert(&db, outbound(&conv, "k")).await.unwrap();
        update_status(&db, m.id, MessageStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        mark_sent(&db, m.id, "wamid.out").await.unwrap();

        let found = find_by_provider_id(&db, "wamid.out").await.unwrap().unwrap();
        assert_eq!(found.id, m.id);
        assert_eq!(found.status, MessageStatus::Sent);
        assert_eq!(found.failure_reason, None);
        assert!(matches!(
            mark_sent(&db, MessageId(999), "x").await,
            Err(MostradorError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn retry_counter_saturates_at_cap() {
        let (db, conv, _dir) = setup().await;
        let m = insert(&db, outbound(&conv, "k")).await.unwrap();
        let mut last = None;
        for _ in 0..5 {
            last = Some(record_retry_attempt(&db, m.id, Utc::now(), 3).await.unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.retry_count, 3);
        assert!(last.last_retry_at.is_some());
    }

    #[tokio::test]
    async fn recent_returns_tail_in_order() {
        let (db, conv, _dir) = setup().await;
        for i in 0..5 {
            insert(&db, outbound(&conv, &format!("k{i}"))).await.unwrap();
        }
        let tail = recent(&db, &conv, 3).await.unwrap();
        let keys: Vec<_> = tail.iter().filter_map(|m| m.client_id.clone()).collect();
        assert_eq!(keys, ["k2", "k3", "k4"]);
    }

    #[tokio::test]
    async fn stale_pending_and_retention() {
        let (db, conv, _dir) = setup().await;
        let now = Utc::now();

        let mut old = outbound(&conv, "old");
        old.created_at = now - chrono::Duration::hours(2);
        let old = insert(&db, old).await.unwrap();
        let fresh = insert(&db, outbound(&conv, "fresh")).await.unwrap();

        let cutoff = now - chrono::Duration::minutes(30);
        assert_eq!(fail_stale_pending(&db, cutoff, "stale").await.unwrap(), 1);

        let failed = list_failed(&db).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, old.id);
        assert_eq!(failed[0].failure_reason.as_deref(), Some("stale"));

        update_status(&db, fresh.id, MessageStatus::Failed, None)
            .await
            .unwrap();
        assert_eq!(list_failed(&db).await.unwrap()[0].id, old.id);

        assert_eq!(delete_failed_older_than(&db, cutoff).await.unwrap(), 1);
        assert!(get(&db, old.id).await.unwrap().is_none());
        assert!(get(&db, fresh.id).await.unwrap().is_some());
    }
}
