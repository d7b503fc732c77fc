// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messaging Gateway trait: the vendor transport for outbound messages.
//!
//! Receiving is push-based (webhook) and lives in the HTTP surface, so the
//! trait only exposes `send`.

use async_trait::async_trait;

use crate::error::MostradorError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{MessageContent, SendReceipt};

#[async_trait]
pub trait MessagingGateway: PluginAdapter {
    /// Send `content` to the counterpart `to`.
    ///
    /// Transport and HTTP failures are reported as
    /// [`MostradorError::Gateway`] so callers can classify them.
    async fn send(&self, to: &str, content: &MessageContent) -> Result<SendReceipt, MostradorError>;
}
