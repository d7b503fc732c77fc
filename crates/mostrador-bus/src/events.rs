// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed events pushed to operators, and commands accepted from them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use mostrador_core::{AiMode, ControlMode, ConversationId, Message, MessageId, MessageStatus};

/// Fan-out scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every connected operator.
    Global,
    /// Operators that joined one conversation.
    Conversation(ConversationId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Conversation(id) => write!(f, "conversation:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Server-to-client event. Serialized as
/// `{"event": "<name>", "data": {...}, "timestamp": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum HubEvent {
    NewMessage {
        conversation_id: ConversationId,
        message: Message,
        /// The automated responder was suppressed; a human should answer.
        requires_agent_action: bool,
    },
    MessageStatusUpdate {
        conversation_id: ConversationId,
        message_id: MessageId,
        status: MessageStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_message_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    MessageFailed {
        conversation_id: ConversationId,
        message_id: MessageId,
        reason: String,
        retry_count: u32,
        /// No further automatic attempts will be made.
        permanent: bool,
    },
    ConversationModeChanged {
        conversation_id: ConversationId,
        previous_mode: ControlMode,
        new_mode: ControlMode,
        ai_mode: AiMode,
        assigned_agent_id: Option<String>,
        actor_agent_id: Option<String>,
        reason: Option<String>,
    },
    ConversationUpdated {
        conversation_id: ConversationId,
        unread_count: u32,
        last_message_at: Option<DateTime<Utc>>,
    },
    UserConnected {
        principal_id: String,
        display_name: String,
    },
    UserDisconnected {
        principal_id: String,
        display_name: String,
    },
    UserTyping {
        conversation_id: ConversationId,
        principal_id: String,
        display_name: String,
        is_typing: bool,
    },
    JoinedConversation {
        conversation_id: ConversationId,
    },
    LeftConversation {
        conversation_id: ConversationId,
    },
    Pong {
        client_timestamp: i64,
        server_timestamp: i64,
        latency_ms: i64,
    },
    SystemNotice {
        level: NoticeLevel,
        message: String,
    },
    Error {
        message: String,
    },
}

impl HubEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::MessageStatusUpdate { .. } => "message_status_update",
            Self::MessageFailed { .. } => "message_failed",
            Self::ConversationModeChanged { .. } => "conversation_mode_changed",
            Self::ConversationUpdated { .. } => "conversation_updated",
            Self::UserConnected { .. } => "user_connected",
            Self::UserDisconnected { .. } => "user_disconnected",
            Self::UserTyping { .. } => "user_typing",
            Self::JoinedConversation { .. } => "joined_conversation",
            Self::LeftConversation { .. } => "left_conversation",
            Self::Pong { .. } => "pong",
            Self::SystemNotice { .. } => "system_notice",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to a text frame stamped with `at`.
    pub fn to_frame(&self, at: DateTime<Utc>) -> String {
        let mut value = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(event = self.name(), error = %e, "failed to serialize hub event");
                serde_json::json!({ "event": "error", "data": { "message": "serialization failure" } })
            }
        };
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(at.to_rfc3339()),
            );
        }
        value.to_string()
    }
}

/// Client-to-server command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinConversation {
        conversation_id: ConversationId,
    },
    LeaveConversation {
        conversation_id: ConversationId,
    },
    Typing {
        conversation_id: ConversationId,
        #[serde(default = "default_true")]
        is_typing: bool,
    },
    /// `timestamp` is the client clock in milliseconds since the epoch.
    Ping {
        timestamp: i64,
    },
}

fn default_true() -> bool {
    true
}
