// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider-neutral inbound events produced by webhook parsers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageContent, MessageStatus};

/// A customer message as received from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Globally unique provider id; the inbound dedup key.
    pub provider_message_id: String,
    /// Counterpart phone number / handle.
    pub from: String,
    pub contact_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub content: MessageContent,
}

/// A delivery receipt for a message we sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReceipt {
    pub provider_message_id: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    /// Provider error detail for `failed` receipts.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    Message(InboundMessage),
    Status(StatusReceipt),
}

impl InboundEvent {
    pub fn provider_message_id(&self) -> &str {
        match self {
            Self::Message(m) => &m.provider_message_id,
            Self::Status(s) => &s.provider_message_id,
        }
    }
}
