// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp webhook payloads.
//!
//! Only `messages` changes are read. Message types the control-plane cannot
//! represent, and status values other than sent/delivered/read/failed, are
//! skipped with a debug log rather than failing the whole payload.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use mostrador_core::{
    InboundEvent, InboundMessage, MessageContent, MessageStatus, MostradorError, StatusReceipt,
};

const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    pub field: String,
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: Vec<WaMessage>,
    #[serde(default)]
    pub statuses: Vec<WaStatus>,
}

#[derive(Debug, Deserialize)]
pub struct Contact {
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WaMessage {
    pub id: String,
    pub from: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextBody>,
    #[serde(default)]
    pub image: Option<Media>,
    #[serde(default)]
    pub video: Option<Media>,
    #[serde(default)]
    pub audio: Option<Media>,
    #[serde(default)]
    pub document: Option<Media>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub interactive: Option<Interactive>,
    /// Quick-reply button on a template message.
    #[serde(default)]
    pub button: Option<Button>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct Media {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Interactive {
    #[serde(default)]
    pub button_reply: Option<Reply>,
    #[serde(default)]
    pub list_reply: Option<Reply>,
}

#[derive(Debug, Deserialize)]
pub struct Reply {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct Button {
    #[serde(default)]
    pub payload: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct WaStatus {
    pub id: String,
    pub status: String,
    pub timestamp: String,
    #[serde(default)]
    pub errors: Vec<WaError>,
}

#[derive(Debug, Deserialize)]
pub struct WaError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Parse a raw webhook body into inbound events, in payload order.
///
/// A body that is not JSON, or not a WhatsApp business account payload, is
/// a validation error.
pub fn parse_webhook(body: &[u8]) -> Result<Vec<InboundEvent>, MostradorError> {
    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|e| MostradorError::Validation(format!("malformed webhook payload: {e}")))?;
    if payload.object != BUSINESS_ACCOUNT_OBJECT {
        return Err(MostradorError::Validation(format!(
            "unexpected webhook object `{}`",
            payload.object
        )));
    }
    Ok(payload.into_events())
}

impl WebhookPayload {
    pub fn into_events(self) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        for change in self.entry.into_iter().flat_map(|e| e.changes) {
            if change.field != "messages" {
                debug!(field = %change.field, "ignoring webhook change");
                continue;
            }
            let value = change.value;
            let names: HashMap<String, String> = value
                .contacts
                .into_iter()
                .filter_map(|c| c.profile.and_then(|p| p.name).map(|name| (c.wa_id, name)))
                .collect();

            for message in value.messages {
                let contact_name = names.get(&message.from).cloned();
                if let Some(inbound) = message.into_inbound(contact_name) {
                    events.push(InboundEvent::Message(inbound));
                }
            }
            events.extend(
                value
                    .statuses
                    .into_iter()
                    .filter_map(WaStatus::into_receipt)
                    .map(InboundEvent::Status),
            );
        }
        events
    }
}

impl WaMessage {
    fn content(&mut self) -> Option<MessageContent> {
        let content = match self.kind.as_str() {
            "text" => MessageContent::text(self.text.take()?.body),
            "image" => {
                let m = self.image.take()?;
                MessageContent::Image {
                    media_id: m.id,
                    caption: m.caption,
                    mime_type: m.mime_type,
                }
            }
            "video" => {
                let m = self.video.take()?;
                MessageContent::Video {
                    media_id: m.id,
                    caption: m.caption,
                    mime_type: m.mime_type,
                }
            }
            "audio" | "voice" => {
                let m = self.audio.take()?;
                MessageContent::Audio {
                    media_id: m.id,
                    mime_type: m.mime_type,
                }
            }
            "document" => {
                let m = self.document.take()?;
                MessageContent::Document {
                    media_id: m.id,
                    filename: m.filename,
                    caption: m.caption,
                    mime_type: m.mime_type,
                }
            }
            "location" => {
                let l = self.location.take()?;
                MessageContent::Location {
                    latitude: l.latitude,
                    longitude: l.longitude,
                    name: l.name,
                    address: l.address,
                }
            }
            "interactive" => {
                let i = self.interactive.take()?;
                let reply = i.button_reply.or(i.list_reply)?;
                MessageContent::Interactive {
                    reply_id: reply.id,
                    title: reply.title,
                }
            }
            "button" => {
                let b = self.button.take()?;
                MessageContent::Interactive {
                    reply_id: b.payload.unwrap_or_else(|| b.text.clone()),
                    title: b.text,
                }
            }
            _ => return None,
        };
        Some(content)
    }

    fn into_inbound(mut self, contact_name: Option<String>) -> Option<InboundMessage> {
        let Some(content) = self.content() else {
            debug!(provider_message_id = %self.id, kind = %self.kind, "skipping unsupported message type");
            return None;
        };
        Some(InboundMessage {
            timestamp: parse_timestamp(&self.timestamp),
            provider_message_id: self.id,
            from: self.from,
            contact_name,
            content,
        })
    }
}

impl WaStatus {
    fn into_receipt(self) -> Option<StatusReceipt> {
        let status = match self.status.as_str() {
            "sent" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            "failed" => MessageStatus::Failed,
            other => {
                debug!(provider_message_id = %self.id, status = other, "skipping status");
                return None;
            }
        };
        let error = self.errors.first().map(|e| {
            let detail = e
                .message
                .as_deref()
                .or(e.title.as_deref())
                .unwrap_or("unknown error");
            match e.code {
                Some(code) => format!("{code}: {detail}"),
                None => detail.to_string(),
            }
        });
        Some(StatusReceipt {
            timestamp: parse_timestamp(&self.timestamp),
            provider_message_id: self.id,
            status,
            error,
        })
    }
}

/// Graph timestamps are unix seconds as strings.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA_ID",
                "changes": [{ "field": "messages", "value": value }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn text_message_with_contact_name() {
        let body = payload(json!({
            "messaging_product": "whatsapp",
            "metadata": { "display_phone_number": "15550000", "phone_number_id": "1098765" },
            "contacts": [{ "profile": { "name": "Lucía" }, "wa_id": "5215550001" }],
            "messages": [{
                "from": "5215550001",
                "id": "wamid.in.1",
                "timestamp": "1760000000",
                "type": "text",
                "text": { "body": "Hola" }
            }]
        }));

        let events = parse_webhook(&body).unwrap();
        assert_eq!(events.len(), 1);
        let InboundEvent::Message(message) = &events[0] else {
            panic!("expected a message");
        };
        assert_eq!(message.provider_message_id, "wamid.in.1");
        assert_eq!(message.from, "5215550001");
        assert_eq!(message.contact_name.as_deref(), Some("Lucía"));
        assert_eq!(message.content, MessageContent::text("Hola"));
        assert_eq!(message.timestamp.timestamp(), 1_760_000_000);
    }

    #[test]
    fn media_location_and_replies() {
        let body = payload(json!({
            "messages": [
                {
                    "from": "1", "id": "a", "timestamp": "1", "type": "image",
                    "image": { "id": "media-1", "mime_type": "image/jpeg", "caption": "recibo" }
                },
                {
                    "from": "1", "id": "b", "timestamp": "1", "type": "location",
                    "location": { "latitude": 19.43, "longitude": -99.13, "name": "Zócalo" }
                },
                {
                    "from": "1", "id": "c", "timestamp": "1", "type": "interactive",
                    "interactive": { "type": "list_reply", "list_reply": { "id": "opt-2", "title": "Envíos" } }
                },
                {
                    "from": "1", "id": "d", "timestamp": "1", "type": "button",
                    "button": { "payload": "CONFIRM", "text": "Confirmar" }
                }
            ]
        }));

        let contents: Vec<MessageContent> = parse_webhook(&body)
            .unwrap()
            .into_iter()
            .map(|e| match e {
                InboundEvent::Message(m) => m.content,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            contents,
            vec![
                MessageContent::Image {
                    media_id: "media-1".into(),
                    caption: Some("recibo".into()),
                    mime_type: Some("image/jpeg".into()),
                },
                MessageContent::Location {
                    latitude: 19.43,
                    longitude: -99.13,
                    name: Some("Zócalo".into()),
                    address: None,
                },
                MessageContent::Interactive {
                    reply_id: "opt-2".into(),
                    title: "Envíos".into(),
                },
                MessageContent::Interactive {
                    reply_id: "CONFIRM".into(),
                    title: "Confirmar".into(),
                },
            ]
        );
    }

    #[test]
    fn unsupported_types_are_skipped() {
        let body = payload(json!({
            "messages": [
                { "from": "1", "id": "s", "timestamp": "1", "type": "sticker", "sticker": { "id": "x" } },
                { "from": "1", "id": "t", "timestamp": "1", "type": "text", "text": { "body": "ok" } }
            ]
        }));
        let events = parse_webhook(&body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].provider_message_id(), "t");
    }

    #[test]
    fn statuses_carry_error_detail() {
        let body = payload(json!({
            "statuses": [
                { "id": "wamid.out.1", "status": "delivered", "timestamp": "1760000001", "recipient_id": "1" },
                {
                    "id": "wamid.out.2", "status": "failed", "timestamp": "1760000002", "recipient_id": "1",
                    "errors": [{ "code": 131047, "title": "Re-engagement message" }]
                },
                { "id": "wamid.out.3", "status": "deleted", "timestamp": "1760000003" }
            ]
        }));

        let events = parse_webhook(&body).unwrap();
        assert_eq!(events.len(), 2);
        let InboundEvent::Status(delivered) = &events[0] else {
            panic!("expected a status");
        };
        assert_eq!(delivered.status, MessageStatus::Delivered);
        assert_eq!(delivered.error, None);
        let InboundEvent::Status(failed) = &events[1] else {
            panic!("expected a status");
        };
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("131047: Re-engagement message"));
    }

    #[test]
    fn other_fields_and_objects() {
        let body = serde_json::to_vec(&json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "field": "account_update", "value": {} }] }]
        }))
        .unwrap();
        assert!(parse_webhook(&body).unwrap().is_empty());

        let body = serde_json::to_vec(&json!({ "object": "page", "entry": [] })).unwrap();
        assert!(matches!(
            parse_webhook(&body),
            Err(MostradorError::Validation(_))
        ));
        assert!(parse_webhook(b"not json").is_err());
    }
}
