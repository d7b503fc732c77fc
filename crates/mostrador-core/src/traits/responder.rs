// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Automated Responder trait.

use async_trait::async_trait;

use crate::error::MostradorError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{Conversation, Message};

/// Generates a reply for a conversation, or declines.
#[async_trait]
pub trait AutomatedResponder: PluginAdapter {
    /// `transcript` is ordered oldest first and ends with the message that
    /// triggered the call. `Ok(None)` means the responder declines to answer.
    async fn respond(
        &self,
        conversation: &Conversation,
        transcript: &[Message],
    ) -> Result<Option<String>, MostradorError>;
}
