// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation and message data model shared by all crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::MostradorError;

/// Maximum body length accepted by the WhatsApp Cloud API for text messages.
pub const MAX_TEXT_LEN: usize = 4096;

/// Maximum caption length for media messages.
pub const MAX_CAPTION_LEN: usize = 1024;

/// Opaque conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Store-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Waiting,
    Closed,
}

/// Which party is authorized to answer in a conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControlMode {
    /// The automated responder acts unless an agent has claimed the conversation.
    #[default]
    Spectator,
    /// A human agent owns the conversation; automation is suppressed.
    Takeover,
    /// Automation is forced on; human intervention is disabled.
    AiOnly,
}

/// Legacy automation switch, read together with [`ControlMode`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AiMode {
    #[default]
    Active,
    Inactive,
    Paused,
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SenderType {
    User,
    Agent,
    Bot,
}

/// Delivery status of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending | Self::Failed => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }

    /// Whether a stored message in `self` may move to `next`.
    ///
    /// Progress is monotonic (`pending < sent < delivered < read`). `failed`
    /// is reachable from `pending` and `sent` only, and a failed message may
    /// move forward again once recovery resends it.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        match (self, next) {
            _ if self == next => false,
            (Self::Read, _) => false,
            (_, Self::Failed) => matches!(self, Self::Pending | Self::Sent),
            (Self::Failed, _) => true,
            _ => next.rank() > self.rank(),
        }
    }

    /// Whether the message has left the process (accepted by the provider).
    pub fn is_dispatched(self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Read)
    }
}

/// Scheduling priority of an outbound job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Tiers in dequeue order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Numeric rank, higher wins.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 2,
            Self::Normal => 1,
            Self::Low => 0,
        }
    }
}

/// Discriminant of [`MessageContent`], persisted alongside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
    Interactive,
}

/// Message payload, one variant per message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Image {
        media_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Video {
        media_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Audio {
        media_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Document {
        media_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
    /// A button or list reply chosen by the customer.
    Interactive { reply_id: String, title: String },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
            Self::Video { .. } => MessageKind::Video,
            Self::Audio { .. } => MessageKind::Audio,
            Self::Document { .. } => MessageKind::Document,
            Self::Location { .. } => MessageKind::Location,
            Self::Interactive { .. } => MessageKind::Interactive,
        }
    }

    /// Human-readable one-line rendering used for transcripts and dashboards.
    pub fn preview(&self) -> String {
        let labelled = |label: &str, extra: Option<&String>| match extra {
            Some(text) if !text.is_empty() => format!("[{label}] {text}"),
            _ => format!("[{label}]"),
        };
        match self {
            Self::Text { body } => body.clone(),
            Self::Image { caption, .. } => labelled("image", caption.as_ref()),
            Self::Video { caption, .. } => labelled("video", caption.as_ref()),
            Self::Audio { .. } => "[audio]".to_string(),
            Self::Document {
                filename, caption, ..
            } => labelled("document", caption.as_ref().or(filename.as_ref())),
            Self::Location { name, .. } => labelled("location", name.as_ref()),
            Self::Interactive { title, .. } => title.clone(),
        }
    }

    /// Validate the payload at the ingestion or enqueue boundary.
    pub fn validate(&self) -> Result<(), MostradorError> {
        let caption_ok = |caption: &Option<String>| match caption {
            Some(c) if c.chars().count() > MAX_CAPTION_LEN => Err(MostradorError::Validation(
                format!("caption exceeds {MAX_CAPTION_LEN} characters"),
            )),
            _ => Ok(()),
        };
        let media_ok = |media_id: &str| {
            if media_id.trim().is_empty() {
                Err(MostradorError::Validation("media_id must not be empty".into()))
            } else {
                Ok(())
            }
        };

        match self {
            Self::Text { body } => {
                if body.trim().is_empty() {
                    return Err(MostradorError::Validation(
                        "text body must not be empty".into(),
                    ));
                }
                if body.chars().count() > MAX_TEXT_LEN {
                    return Err(MostradorError::Validation(format!(
                        "text body exceeds {MAX_TEXT_LEN} characters"
                    )));
                }
                Ok(())
            }
            Self::Image {
                media_id, caption, ..
            }
            | Self::Video {
                media_id, caption, ..
            }
            | Self::Document {
                media_id, caption, ..
            } => {
                media_ok(media_id.as_str())?;
                caption_ok(caption)
            }
            Self::Audio { media_id, .. } => media_ok(media_id.as_str()),
            Self::Location {
                latitude,
                longitude,
                ..
            } => {
                if !(-90.0..=90.0).contains(latitude) || !(-180.0..=180.0).contains(longitude) {
                    return Err(MostradorError::Validation(format!(
                        "coordinates out of range: {latitude},{longitude}"
                    )));
                }
                Ok(())
            }
            Self::Interactive { reply_id, .. } => {
                if reply_id.trim().is_empty() {
                    return Err(MostradorError::Validation(
                        "interactive reply_id must not be empty".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// The ongoing thread with one end customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Natural key: the customer's phone number / WhatsApp id.
    pub counterpart: String,
    pub contact_name: Option<String>,
    pub status: ConversationStatus,
    pub control_mode: ControlMode,
    pub ai_mode: AiMode,
    pub assigned_agent_id: Option<String>,
    pub unread_count: u32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A new conversation in the default `spectator`/`active` state.
    pub fn new(counterpart: impl Into<String>, contact_name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId::generate(),
            counterpart: counterpart.into(),
            contact_name,
            status: ConversationStatus::Active,
            control_mode: ControlMode::Spectator,
            ai_mode: AiMode::Active,
            assigned_agent_id: None,
            unread_count: 0,
            last_message_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a conversation row.
///
/// `assigned_agent_id` is doubly optional: `None` leaves the field alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPatch {
    pub status: Option<ConversationStatus>,
    pub control_mode: Option<ControlMode>,
    pub ai_mode: Option<AiMode>,
    pub assigned_agent_id: Option<Option<String>>,
    pub contact_name: Option<String>,
}

impl ConversationPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch in place and bump `updated_at`.
    pub fn apply(&self, conversation: &mut Conversation, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            conversation.status = status;
        }
        if let Some(mode) = self.control_mode {
            conversation.control_mode = mode;
        }
        if let Some(ai_mode) = self.ai_mode {
            conversation.ai_mode = ai_mode;
        }
        if let Some(agent) = &self.assigned_agent_id {
            conversation.assigned_agent_id = agent.clone();
        }
        if let Some(name) = &self.contact_name {
            conversation.contact_name = Some(name.clone());
        }
        conversation.updated_at = now;
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Caller-assigned idempotency key for outbound sends.
    pub client_id: Option<String>,
    /// Provider-assigned id, known for inbound messages and once sent.
    pub provider_message_id: Option<String>,
    pub sender_type: SenderType,
    /// Agent id for agent-authored messages.
    pub sender_id: Option<String>,
    pub content: MessageContent,
    pub status: MessageStatus,
    pub failure_reason: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }
}

/// Fields for creating a message.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub client_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub sender_type: SenderType,
    pub sender_id: Option<String>,
    pub content: MessageContent,
    pub status: MessageStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One audit record of a control-mode change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeChange {
    pub conversation_id: ConversationId,
    pub previous_mode: ControlMode,
    pub new_mode: ControlMode,
    pub previous_ai_mode: AiMode,
    pub new_ai_mode: AiMode,
    pub actor_agent_id: Option<String>,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Receipt returned by the Messaging Gateway for an accepted send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
}

/// Operator role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Admin,
    Supervisor,
    Agent,
}

/// A verified operator identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

/// Adapter categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AdapterType {
    Store,
    Gateway,
    Responder,
    Identity,
    Observability,
}

/// Health status reported by adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn enums_round_trip_through_strings() {
        assert_eq!(ControlMode::AiOnly.to_string(), "ai_only");
        assert_eq!(ControlMode::from_str("takeover").unwrap(), ControlMode::Takeover);
        assert_eq!(AiMode::from_str("paused").unwrap(), AiMode::Paused);
        assert_eq!(MessageStatus::Delivered.to_string(), "delivered");
        assert!(Priority::from_str("urgent").is_err());
    }

    #[test]
    fn status_progress_is_monotonic() {
        use MessageStatus::*;
        assert!(Pending.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Read));
        assert!(!Delivered.can_advance_to(Sent));
        assert!(!Read.can_advance_to(Delivered));
        assert!(!Read.can_advance_to(Failed));
        assert!(Pending.can_advance_to(Failed));
        assert!(!Delivered.can_advance_to(Failed));
        assert!(Failed.can_advance_to(Sent));
        assert!(!Sent.can_advance_to(Sent));
    }

    #[test]
    fn content_serializes_with_type_tag() {
        let content = MessageContent::Image {
            media_id: "m1".into(),
            caption: Some("brake pads".into()),
            mime_type: None,
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["caption"], "brake pads");
        assert!(json.get("mime_type").is_none());

        let parsed: MessageContent =
            serde_json::from_str(r#"{"type":"text","body":"Hola"}"#).unwrap();
        assert_eq!(parsed, MessageContent::text("Hola"));
    }

    #[test]
    fn preview_labels_media() {
        assert_eq!(MessageContent::text("Hola").preview(), "Hola");
        let doc = MessageContent::Document {
            media_id: "d".into(),
            filename: Some("invoice.pdf".into()),
            caption: None,
            mime_type: None,
        };
        assert_eq!(doc.preview(), "[document] invoice.pdf");
        let audio = MessageContent::Audio {
            media_id: "a".into(),
            mime_type: None,
        };
        assert_eq!(audio.preview(), "[audio]");
    }

    #[test]
    fn validate_rejects_bad_payloads() {
        assert!(MessageContent::text("   ").validate().is_err());
        assert!(MessageContent::text("x".repeat(MAX_TEXT_LEN + 1)).validate().is_err());
        assert!(MessageContent::text("Hola").validate().is_ok());
        let loc = MessageContent::Location {
            latitude: 120.0,
            longitude: 0.0,
            name: None,
            address: None,
        };
        assert!(loc.validate().is_err());
        let img = MessageContent::Image {
            media_id: "".into(),
            caption: None,
            mime_type: None,
        };
        assert!(img.validate().is_err());
    }

    #[test]
    fn patch_clears_assignment() {
        let now = Utc::now();
        let mut conv = Conversation::new("5215550001", None, now);
        conv.assigned_agent_id = Some("ana".into());
        let patch = ConversationPatch {
            assigned_agent_id: Some(None),
            control_mode: Some(ControlMode::Spectator),
            ..Default::default()
        };
        patch.apply(&mut conv, now);
        assert!(conv.assigned_agent_id.is_none());
        assert!(ConversationPatch::default().is_empty());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn any_status() -> impl Strategy<Value = MessageStatus> {
            prop_oneof![
                Just(MessageStatus::Pending),
                Just(MessageStatus::Sent),
                Just(MessageStatus::Delivered),
                Just(MessageStatus::Read),
                Just(MessageStatus::Failed),
            ]
        }

        proptest! {
            #[test]
            fn no_status_cycles_back_to_itself(a in any_status(), b in any_status()) {
                // Two-step cycles are only possible through recovery (failed -> sent -> failed).
                if a.can_advance_to(b) && b.can_advance_to(a) {
                    prop_assert!(matches!(
                        (a, b),
                        (MessageStatus::Failed, MessageStatus::Sent)
                            | (MessageStatus::Sent, MessageStatus::Failed)
                            | (MessageStatus::Failed, MessageStatus::Pending)
                            | (MessageStatus::Pending, MessageStatus::Failed)
                    ));
                }
            }
        }
    }
}
