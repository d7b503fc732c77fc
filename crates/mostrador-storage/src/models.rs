// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row codecs between SQLite columns and the core domain types.
//!
//! Timestamps are stored as RFC 3339 UTC text with microsecond precision so
//! that lexicographic order matches chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use mostrador_core::{
    Conversation, ConversationId, Message, MessageContent, MessageId, ModeChange, MostradorError,
};

/// Columns read by [`conversation_from_row`], in order.
pub const CONVERSATION_COLUMNS: &str = "id, counterpart, contact_name, status, control_mode, \
     ai_mode, assigned_agent_id, unread_count, last_message_at, created_at, updated_at";

/// Columns read by [`message_from_row`], in order.
pub const MESSAGE_COLUMNS: &str = "id, conversation_id, client_id, provider_message_id, \
     sender_type, sender_id, content, status, failure_reason, retry_count, created_at, \
     updated_at, last_retry_at";

/// Columns read by [`mode_change_from_row`], in order.
pub const MODE_CHANGE_COLUMNS: &str = "conversation_id, previous_mode, new_mode, \
     previous_ai_mode, new_ai_mode, actor_agent_id, reason, changed_at";

pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn encode_content(content: &MessageContent) -> Result<String, MostradorError> {
    serde_json::to_string(content)
        .map_err(|e| MostradorError::Internal(format!("unencodable message content: {e}")))
}

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => ts_at(row, idx).map(Some),
    }
}

fn enum_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

pub fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId(row.get(0)?),
        counterpart: row.get(1)?,
        contact_name: row.get(2)?,
        status: enum_at(row, 3)?,
        control_mode: enum_at(row, 4)?,
        ai_mode: enum_at(row, 5)?,
        assigned_agent_id: row.get(6)?,
        unread_count: row.get(7)?,
        last_message_at: opt_ts_at(row, 8)?,
        created_at: ts_at(row, 9)?,
        updated_at: ts_at(row, 10)?,
    })
}

pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let raw_content: String = row.get(6)?;
    let content = serde_json::from_str(&raw_content).map_err(|e| conversion_err(6, e))?;
    Ok(Message {
        id: MessageId(row.get(0)?),
        conversation_id: ConversationId(row.get(1)?),
        client_id: row.get(2)?,
        provider_message_id: row.get(3)?,
        sender_type: enum_at(row, 4)?,
        sender_id: row.get(5)?,
        content,
        status: enum_at(row, 7)?,
        failure_reason: row.get(8)?,
        retry_count: row.get(9)?,
        created_at: ts_at(row, 10)?,
        updated_at: ts_at(row, 11)?,
        last_retry_at: opt_ts_at(row, 12)?,
    })
}

pub fn mode_change_from_row(row: &Row<'_>) -> rusqlite::Result<ModeChange> {
    Ok(ModeChange {
        conversation_id: ConversationId(row.get(0)?),
        previous_mode: enum_at(row, 1)?,
        new_mode: enum_at(row, 2)?,
        previous_ai_mode: enum_at(row, 3)?,
        new_ai_mode: enum_at(row, 4)?,
        actor_agent_id: row.get(5)?,
        reason: row.get(6)?,
        changed_at: ts_at(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn timestamps_sort_chronologically_as_text() {
        let base = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 59).unwrap();
        let earlier = encode_ts(&base);
        let later = encode_ts(&(base + Duration::microseconds(1)));
        let much_later = encode_ts(&(base + Duration::days(400)));
        assert!(earlier < later);
        assert!(later < much_later);
        assert!(earlier.ends_with('Z'));
    }
}
